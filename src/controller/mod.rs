mod client;
mod manager;

pub use client::{
    ContainerInfo, ContainerStats, ContainerSummary, ControllerClient, ControllerHealth,
    ControllerRequestError, CreateContainerRequest, LogsResponse, OpResponse, RegistryAuth,
};
pub use manager::{
    pick_controller, ControllerError, ControllerManager, ControllerSnapshot, PlacementRequirements,
};
