//! Concrete projections.
//!
//! - [`StreamRemovalProjection`]: applies a retention policy to the streams it sees
//! - [`EventTypeSizeProjection`]: audits storage footprint per event type
//! - [`StartPositionFromDateProjection`]: finds the first log position of a date

mod event_type_size;
mod start_position;
mod stream_removal;

pub use event_type_size::{
    event_footprint, EventInfo, EventTypeSizeProjection, EventTypeSizeProjector,
    EventTypeSizeState,
};
pub use start_position::{
    StartPositionFromDateProjection, StartPositionFromDateProjector, StartPositionFromDateState,
};
pub use stream_removal::{DeleteState, EventError, StreamRemovalProjection, StreamRemovalProjector};
