//! # dhcpmod
//!
//! Editor for a dhcpd-style text configuration that tracks subnet
//! declarations and fixed host reservations inside a single supernet.
//!
//! The crate parses the full file into an in-memory model, applies one
//! mutation (allocate or remove a subnet, reserve or release a host
//! address), and regenerates the complete file text from the model. Nothing
//! is edited in place; the output is always a canonical rewrite.
//!
//! Architecture:
//! - [`addr`]: CIDR arithmetic, the prefix/host-capacity table, and the
//!   host and sub-block iterators
//! - [`subnet`] and [`reservation`]: the two registries with their
//!   allocation, search, and removal logic
//! - [`engine`]: the per-invocation context combining globals and both
//!   registries
//! - [`document`]: the line grammar, parsing and serialization
//! - [`error`]: the error taxonomy shared by all of the above
//!
//! ```
//! let text = concat!(
//!     "###General Configuration\n",
//!     "##@supernet=10.0.0.0/16\n",
//!     "##@subnet_size=50\n",
//!     "##@subnet_gateway=first\n",
//!     "\n",
//!     "###Subnets and Reservations\n",
//! );
//! let mut engine = dhcpmod::document::parse(text)?;
//! let subnet = engine.add_subnet(Some(10), Some("lab".to_string()), None)?;
//! assert_eq!(subnet.ipv4.unwrap().block.to_string(), "10.0.0.0/28");
//! let output = dhcpmod::document::serialize(&engine);
//! assert!(output.contains("# subnet - lab,10.0.0.0/28,10.0.0.1,,"));
//! # Ok::<(), dhcpmod::error::Error>(())
//! ```

pub mod addr;
pub mod document;
pub mod engine;
pub mod error;
pub mod reservation;
pub mod subnet;
