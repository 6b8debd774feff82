pub mod clock;
pub mod config;
pub mod error;
pub mod topics;

pub use clock::{Clock, FrameClock, ManualClock, TrueClock};
pub use config::{SchedulerConfig, load_dotenv};
pub use error::*;
