pub mod events;
pub mod manager;

pub use events::{update_channel, UpdateEvent, UpdateKind, UpdateReceiver, UpdateSender};
pub use manager::{Downloader, DownloaderConfig};
