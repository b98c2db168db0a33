pub mod backend;
pub mod service;
pub mod stitch;
pub mod types;
pub mod utils;

pub use backend::{MockFramebuffer, ViewportCapture};
pub use service::CaptureService;
pub use stitch::{device_scale, stitch, stitch_decoded, stitch_frames};
pub use types::{CapturedFrame, SnapshotError, SnapshotResult};
pub use utils::{decode_data_url, encode_png, generate_filename, generate_timestamp, part_filename, to_data_url};
