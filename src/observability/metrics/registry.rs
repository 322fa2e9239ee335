//! Shared Prometheus registry.

use prometheus::Registry;
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
