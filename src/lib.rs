//! subfuse - proxy subscription aggregation
//!
//! Pulls proxy-node definitions from heterogeneous subscription sources
//! and re-emits them as Clash configuration bundles.
//!
//! ```text
//! Scheduler → Pipeline → Fetcher → (link codec ∪ clash adapter) → Proxy → Repository
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── link/       # URI codecs: ss, ssr, vmess, vless, trojan, hy, hy2, tuic
//! ├── models/     # Subscription, Node, Group, and the Proxy record
//! ├── clash/      # Clash document parse / merge / synthesize
//! ├── sub/        # subscription fetcher and payload decoding
//! ├── db/         # SQLite repository
//! └── services/   # aggregation pipeline and refresh scheduler
//! ```

pub mod clash;
pub mod config;
pub mod db;
pub mod error;
pub mod link;
pub mod models;
pub mod services;
pub mod sub;

pub use config::Config;
pub use db::Repository;
pub use error::{Error, ParseError, Result};
pub use models::{Group, Node, Proxy, Subscription};
pub use services::{Pipeline, Scheduler};
