// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic filter validation and matching.
//!
//! Filters follow the MQTT 3.1.1 grammar:
//!
//! - `+` matches exactly one level and must occupy a whole level
//! - `#` matches any number of levels (including the parent) and must be
//!   the last level
//! - topics starting with `$` are never matched by a leading wildcard
//!
//! ```
//! use mqtt_sensor_lib::topic;
//!
//! assert!(topic::matches("aranet/+/sensors/#", "aranet/358151004965/sensors/6009F3/json"));
//! assert!(!topic::matches("#", "$SYS/broker/uptime"));
//! ```

use crate::error::ConfigError;

/// Checks that `filter` is a well-formed topic filter.
///
/// # Errors
///
/// Returns [`ConfigError::MissingTopic`] for an empty filter and
/// [`ConfigError::InvalidTopicFilter`] when a wildcard is misplaced.
pub fn validate_filter(filter: &str) -> Result<(), ConfigError> {
    if filter.is_empty() {
        return Err(ConfigError::MissingTopic);
    }

    let invalid = |reason| ConfigError::InvalidTopicFilter {
        filter: filter.to_string(),
        reason,
    };

    if filter.contains('\0') {
        return Err(invalid("contains a NUL character"));
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();
        if level.contains('#') && (level != "#" || !is_last) {
            return Err(invalid("'#' must be the whole last level"));
        }
        if level.contains('+') && level != "+" {
            return Err(invalid("'+' must occupy a whole level"));
        }
    }

    Ok(())
}

/// Returns whether a concrete `topic` is matched by `filter`.
///
/// The filter is assumed valid; see [`validate_filter`].
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
