//! Runtime components of the bridge.
//!
//! * `sensor` - BNO055 driver behind the `ImuSource` trait
//! * `record` / `buffer` - line-protocol encoding and the batch buffer
//! * `sink` - fan-out delivery to the broker and the metrics endpoint
//! * `sampler` - the sampling loop and its `state`
//! * `bridge` - assembles everything from a loaded `Config`

pub mod bridge;
pub mod buffer;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod record;
pub mod sampler;
pub mod sensor;
pub mod sink;
pub mod state;

pub use bridge::launch;
pub use error::BridgeError;
