//! External-collaborator seams: imagery platform, export queue, callback

pub mod callback;
pub mod export;
pub mod imagery;

pub use callback::{CallbackClient, CallbackTransport, HttpTransport, NoAuth, TokenProvider};
pub use export::{
    ExportCoordinator, ExportHandle, ExportJobContext, ExportQueue, ExportSpec, ExportState,
};
pub use imagery::ImageryProvider;
