//SPDX-License-Identifier: MPL-2.0
use std::time::Duration;

use crate::coordinates::Size;
use crate::lifecycle::CoalescePolicy;

/**
Settings for one host and its owner loop.

```
use std::time::Duration;
use window_host::config::HostConfig;
use window_host::lifecycle::CoalescePolicy;

let config = HostConfig::default()
    .with_name("gl owner")
    .with_poll_interval(Duration::from_millis(4))
    .with_coalesce(CoalescePolicy::QueueAll);
assert_eq!(config.name, "gl owner");
```
*/
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Name of the owner thread.
    pub name: String,
    /// Longest the owner loop parks waiting for bridge work before polling native events again.
    pub poll_interval: Duration,
    pub coalesce: CoalescePolicy,
    /// Used when a window is created without a size.
    pub default_size: Size,
    /// Close every window of the host when Escape is pressed in any of them.
    pub close_all_on_escape: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            name: "window_host owner".to_string(),
            //native event polling has no use for more than 1kHz
            poll_interval: Duration::from_millis(1),
            coalesce: CoalescePolicy::default(),
            default_size: Size::default(),
            close_all_on_escape: false,
        }
    }
}

impl HostConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_coalesce(mut self, coalesce: CoalescePolicy) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_default_size(mut self, size: Size) -> Self {
        self.default_size = size;
        self
    }

    pub fn with_close_all_on_escape(mut self, enabled: bool) -> Self {
        self.close_all_on_escape = enabled;
        self
    }
}
