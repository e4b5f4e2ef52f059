// 核心数据结构和类型定义

pub mod types;
pub mod error;
pub mod config;
pub mod interrupt;

pub use types::*;
pub use error::*;
pub use config::Config;
pub use interrupt::{InterruptFlag, Interrupter, Requester};
