pub mod config;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod manager;
pub mod prediction;
pub mod preprocess;
pub mod server;
pub mod torch;
pub mod util;
pub mod worker;

pub use error::PredictError;
pub use handler::InferenceHandler;
pub use prediction::{Label, Prediction};
