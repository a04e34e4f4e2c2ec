// Copyright 2022 jmjoy
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordered query-string / form-urlencoded parsing shared by the CGI
//! Environment Decoder (`QUERY_STRING`) and the `application/x-www-form-
//! urlencoded` body decoder, per `spec.md` §4.4's aggregation rules.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

use indexmap::IndexMap;
use serde::Serialize;

/// A query/form value: either a single string, or a list aggregated from
/// a repeated key or a `key[]` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    /// A key that appeared exactly once, without a `[]` suffix.
    Single(String),
    /// A key that appeared with a `[]` suffix, or that repeated.
    Multi(Vec<String>),
}

impl QueryValue {
    /// Returns the value as a single string, joining a `Multi` with the
    /// first element (used where only a scalar makes sense).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Single(s) => Some(s),
            QueryValue::Multi(v) => v.first().map(String::as_str),
        }
    }
}

/// Ordered key → value mapping, preserving the order keys were first seen.
pub type QueryMap = IndexMap<String, QueryValue>;

fn decode_component(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Parses a `key=value&key2=value2` string (as used for `QUERY_STRING` and
/// for `application/x-www-form-urlencoded` bodies) into an ordered map,
/// applying the per-key aggregation rules from `spec.md` §4.4:
///
/// 1. a key ending in literal `[]` has the suffix stripped and the value
///    appended to a list under the stripped key;
/// 2. otherwise, a key seen once already is promoted to a two-element
///    list and the new value appended;
/// 3. otherwise the value is recorded directly.
///
/// An empty or absent string produces an empty map.
pub fn parse(input: &str) -> QueryMap {
    let mut map = QueryMap::new();
    if input.is_empty() {
        return map;
    }

    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = match pair.split_once('=') {
            Some((k, v)) => (k, Cow::Borrowed(v)),
            None => (pair, Cow::Borrowed("")),
        };
        let value = decode_component(&raw_value);

        if let Some(stripped) = raw_key.strip_suffix("[]") {
            let key = decode_component(stripped);
            insert_multi(&mut map, key, value);
        } else {
            let key = decode_component(raw_key);
            match map.get_mut(&key) {
                Some(QueryValue::Single(existing)) => {
                    let promoted = vec![std::mem::take(existing), value];
                    map.insert(key, QueryValue::Multi(promoted));
                }
                Some(QueryValue::Multi(values)) => values.push(value),
                None => {
                    map.insert(key, QueryValue::Single(value));
                }
            }
        }
    }

    map
}

fn insert_multi(map: &mut QueryMap, key: String, value: String) {
    match map.get_mut(&key) {
        Some(QueryValue::Multi(values)) => values.push(value),
        Some(QueryValue::Single(existing)) => {
            let promoted = vec![std::mem::take(existing), value];
            map.insert(key, QueryValue::Multi(promoted));
        }
        None => {
            map.insert(key, QueryValue::Multi(vec![value]));
        }
    }
}
