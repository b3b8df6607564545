// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// Reduces timestamps to calendar days in the server's reference time zone.
///
/// Two instants map to the same key iff they fall on the same local day,
/// which is all the streak logic ever compares.
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The calendar day `instant` falls on.
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// The current calendar day.
    pub fn today(&self) -> NaiveDate {
        self.day_of(Utc::now())
    }
}
