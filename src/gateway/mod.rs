pub mod pool;
pub mod session;
pub mod stream;
pub mod upload;

pub use pool::{PoolStatus, SessionPool};
pub use session::Session;
pub use stream::{ByteWindow, ObjectStream, Streamer};
pub use upload::{ProgressFn, ThumbnailSource, UploadOptions, Uploader};
