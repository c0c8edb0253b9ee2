use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("broadcast hub is shut down")]
    HubClosed,
}
