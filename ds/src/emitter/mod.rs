//! Emitter - owner of the canonical dashboard state
//!
//! All mutations go through an `Emitter`. Normal-priority mutations (widgets,
//! project, alerts, loading flags) are coalesced behind a debounce timer;
//! task progress mutations flush immediately so consumers see progress
//! without waiting out the window.
//!
//! ```text
//!   set_panel ─┐                               ┌──────────────┐
//!   push_alert ├─ mark dirty ── arm timer ──▶  │ debounced    │
//!   set_*     ─┘                (re-armed)     │ flush        │──▶ Transport
//!                                              └──────────────┘
//!   start_task ─┐
//!   update_*    ├─ disarm timer ── flush now ───────────────────▶ Transport
//!   complete_*  ┘
//! ```

mod engine;
mod errors;

pub use engine::{Emitter, EmitterMetrics, FlushKind};
pub use errors::EmitterError;
