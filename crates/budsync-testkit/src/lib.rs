//! # budsync testkit
//!
//! Testing utilities for the budsync workspace.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: preimages with pinned canonical-CBOR hex for
//!   cross-platform verification (the encoding is frozen)
//! - **Generators**: proptest strategies for canonical values
//! - **Fixtures**: seeded identities, in-memory stores/relays, and
//!   composed contexts for multi-device scenarios
//!
//! ## Golden Vectors
//!
//! ```rust
//! use budsync_testkit::vectors::verify_all_vectors;
//!
//! verify_all_vectors().unwrap();
//! ```
//!
//! ## Fixtures
//!
//! ```rust
//! use budsync_testkit::fixtures::TwoDeviceFixture;
//!
//! let fixture = TwoDeviceFixture::new();
//! let owner_id = fixture.owner.identity().member_id.clone();
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    envelope_for, jar_created_payload, member_added_payload, seeded_identity, DeviceFixture,
    TwoDeviceFixture,
};
pub use generators::{canonical_value, payload_map};
pub use vectors::{
    all_vectors, full_vector, minimal_vector, verify_all_vectors, GoldenVector,
    FULL_PREIMAGE_HEX, MINIMAL_PREIMAGE_HEX, PARENT_CID_AB,
};
