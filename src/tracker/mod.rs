//! The issue tracker: storage, auth, HTTP API and live events.
//!
//! | Module     | Role                                                   |
//! |------------|--------------------------------------------------------|
//! | `db`       | SQLite entity store (`TrackerDb`, `DbHandle`)          |
//! | `workflow` | Per-project status graph and transition checks         |
//! | `auth`     | Passwords, session tokens, API tokens, `Principal`     |
//! | `api`      | axum handlers, extractors and the auth middleware      |
//! | `ws`       | WebSocket event stream over a broadcast channel        |
//! | `server`   | Router assembly, tracing/CORS layers, serve loop       |
//! | `seed`     | Idempotent demo-data bootstrap                         |

pub mod api;
pub mod auth;
pub mod db;
pub mod seed;
pub mod server;
pub mod workflow;
pub mod ws;
