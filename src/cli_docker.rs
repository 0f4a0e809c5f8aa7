mod docker_container;
pub use docker_container::*;
