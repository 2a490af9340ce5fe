//! `Observable` impl for the cassette, following this workspace's
//! introspect-instead-of-log convention.

use trs80_core::{Observable, Value};

use crate::cassette::{Cassette, Status};
use crate::signal::Speed;

const PATHS: &[&str] = &["status", "speed", "byte_cursor", "bit_cursor", "is_blank"];

impl Observable for Cassette {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "status" => Some(Value::String(format!("{:?}", self.status()))),
            "speed" => Some(Value::String(speed_name(self.speed()).to_string())),
            "byte_cursor" => Some(Value::U32(self.byte_cursor() as u32)),
            "bit_cursor" => Some(Value::U8(self.bit_cursor())),
            "is_blank" => Some(Value::Bool(self.is_blank())),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        PATHS
    }
}

fn speed_name(speed: Speed) -> &'static str {
    match speed {
        Speed::Low => "low",
        Speed::High => "high",
    }
}
