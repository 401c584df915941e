//! # souq-core: Pure Message Model for Souq Sync
//!
//! This crate holds the value types shared by everything that talks to the
//! realtime sync layer: the [`Message`](message::Message) envelope that
//! travels on the wire, the [`MessageKind`](message::MessageKind) change
//! taxonomy, and the typed [`EventKey`](event::EventKey)s that subscribers
//! register under.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Souq Sync Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host Application (producers/consumers)          │   │
//! │  │      inventory forms ──► send()      on_update() ──► status UI │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    souq-sync (engine crate)                     │   │
//! │  │        connection manager • dispatcher • outbound queue         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ souq-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────────┐      ┌────────────────────┐           │   │
//! │  │   │      message       │      │       event        │           │   │
//! │  │   │  Message envelope  │      │  EventKey routing  │           │   │
//! │  │   │  MessageKind       │      │  ControlKind       │           │   │
//! │  │   └────────────────────┘      └────────────────────┘           │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • PURE VALUES                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`message`] - The wire envelope (`Message`, `MessageKind`)
//! - [`event`] - Typed subscription keys (`EventKey`, `ControlKind`)
//!
//! ## Design Principles
//!
//! 1. **Opaque payloads**: business entities are `serde_json::Value`; this
//!    crate never interprets them
//! 2. **No I/O**: network, file system, async - all FORBIDDEN here
//! 3. **Lossless wire format**: every `Message` field round-trips through
//!    its JSON frame unchanged

pub mod event;
pub mod message;

pub use event::{ControlKind, EventKey};
pub use message::{Message, MessageKind};
