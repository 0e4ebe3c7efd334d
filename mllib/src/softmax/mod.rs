mod backend;
mod metrics;
mod model;
mod params;

pub use backend::SoftmaxBackend;
pub use model::SoftmaxModel;
