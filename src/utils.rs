// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rand::Rng;

/// Printable ASCII range used for AC-Cookie generation: excludes control
/// characters and space so the value is safe to log verbatim.
const PRINTABLE_LOW: u8 = 0x21;
const PRINTABLE_HIGH: u8 = 0x7e;

/// Generates a 16-byte printable AC-Cookie.
pub fn generate_ac_cookie() -> Vec<u8> {
    let mut rng = rand::rng();
    (0..16).map(|_| rng.random_range(PRINTABLE_LOW..=PRINTABLE_HIGH)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_sixteen_printable_bytes() {
        let cookie = generate_ac_cookie();
        assert_eq!(cookie.len(), 16);
        assert!(cookie.iter().all(|b| (PRINTABLE_LOW..=PRINTABLE_HIGH).contains(b)));
    }
}
