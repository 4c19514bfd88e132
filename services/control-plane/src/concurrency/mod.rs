pub mod deploy_gate;
pub mod event_queue;
pub mod image_pull_lock;

pub use deploy_gate::DeploymentGate;
pub use event_queue::EventQueueRegistry;
pub use image_pull_lock::ImagePullLockRegistry;
