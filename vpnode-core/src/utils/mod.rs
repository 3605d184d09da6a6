//! Small concurrency helpers shared by the connection and management layers

pub mod cancelable;

pub use cancelable::{invoke_on_success, Cancelable, CancelableCall};
