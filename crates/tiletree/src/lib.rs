//! High-level async loader for implicit-tiling subtrees.
//!
//! This crate turns raw subtree binaries into queryable [`Subtree`]
//! values: it parses the tileset configuration, fetches external buffers
//! through a pluggable [`Fetcher`], deduplicates fetches across
//! concurrently-loading subtrees, and hands the bit-level decoding to
//! the `tiletree-decode` crate.
//!
//! # Design principles
//!
//! - **Runtime-agnostic**: Returns boxed futures, works with any executor
//! - **Injected I/O**: All fetching goes through the [`Fetcher`] trait
//! - **All-or-nothing**: A subtree is either fully resolved or failed;
//!   no partial availability is ever exposed
//!
//! # Example
//!
//! ```ignore
//! use tiletree::{BufferResolver, HttpFetcher, Subtree, TilesetConfig};
//!
//! let config = TilesetConfig::from_tile_json(&tile_json)?;
//! let resolver = BufferResolver::new(HttpFetcher::new("https://tiles.example/set/"));
//!
//! let uri = config.subtree_uri_template.resolve(0, 0, 0, 0);
//! let bytes = /* fetch the subtree binary for `uri` */;
//! let subtree = Subtree::decode(&bytes, &config, &resolver).await?;
//!
//! if subtree.tile_is_available(0) {
//!     // The subtree root exists.
//! }
//! ```

pub mod config;
mod error;
pub mod fetch;
pub mod resolver;
mod subtree;

pub use config::{BoundingVolume, OrientedBox, Refine, Region, TilesetConfig, UriTemplate};
pub use error::{Error, Result};
pub use fetch::{FetchFuture, Fetcher, HttpFetcher, MemoryFetcher};
pub use resolver::{BufferKey, BufferResolver, SharedFetch};
pub use subtree::Subtree;

pub use tiletree_decode::{
    AvailabilityBitstream, MetadataSchema, MetadataTable, PropertyValue, ScalarValue, Subdivision,
};
