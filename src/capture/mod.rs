pub mod decode_worker;
pub mod decoder;
pub mod frame;

pub use decode_worker::{DecodeWorker, DecodedColorReceiver};
pub use decoder::ColorDecoder;
pub use frame::{ColorPlane, DepthPlane, Frame, IrPlane, Plane, PointCloud};
