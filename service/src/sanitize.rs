//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Input sanitization
//!
//! Everything a client sends passes through here before it becomes a name or
//! a chat message: control characters are dropped and surrounding whitespace
//! is trimmed.

/// Strip control characters from `input` and trim surrounding whitespace
pub fn sanitize(input: &str) -> String {
    let stripped: String = input.chars().filter(|ch| !ch.is_control()).collect();
    let trimmed = stripped.trim();
    if trimmed.len() == stripped.len() {
        stripped
    } else {
        trimmed.to_string()
    }
}

/// Sanitize raw bytes read from a connection
///
/// Invalid UTF-8 sequences are replaced with U+FFFD rather than rejected.
pub fn sanitize_bytes(input: &[u8]) -> String {
    sanitize(&String::from_utf8_lossy(input))
}
