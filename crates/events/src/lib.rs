//! Event catalog for the haptic controller.
//!
//! Every interaction between components travels as an [`Event`] over the
//! bus. Payloads are a tagged union of concrete variants; containers inside
//! payloads are owned by the event (construction takes ownership), so no
//! subscriber can alias publisher state. Large immutable values (parsed
//! config, rendered output) are shared as `Arc` to keep fan-out cheap.

mod event;
mod ring;

pub use event::{
    ChangeStats, Correlation, Event, EventPayload, EventSummary, RequestId, ScheduleReason,
};
pub use ring::RingBuffer;
