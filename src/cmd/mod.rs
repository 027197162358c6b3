//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled      |
//! |----------|-----------------------|
//! | `serve`  | `Serve`               |
//! | `db`     | `Init`, `Seed`        |
//! | `user`   | `User`                |
//! | `config` | `Config`              |

pub mod config;
pub mod db;
pub mod serve;
pub mod user;

pub use config::cmd_config;
pub use db::{cmd_init, cmd_seed};
pub use serve::cmd_serve;
pub use user::cmd_user;
