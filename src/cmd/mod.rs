//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `review`   | `Review`         |
//! | `report`   | `Report`         |
//! | `sessions` | `Sessions`       |
//! | `tools`    | `Tools`          |
//! | `config`   | `Config`         |

pub mod config;
pub mod report;
pub mod review;
pub mod sessions;
pub mod tools;

pub use config::cmd_config;
pub use report::cmd_report;
pub use review::cmd_review;
pub use sessions::cmd_sessions;
pub use tools::cmd_tools;
