//! Test-support helpers for the UFS workspace.
//! Only for use inside tests.

// Re-exported for use by the macros below.
pub use binrw;
pub use pastey;

/// Decodes a hex string into bytes. Panics on malformed input, which is
/// fine for test fixtures.
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "hex string has odd length");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("bad hex digit"))
        .collect()
}

/// Generates a pair of tests asserting that a record value serializes to
/// the given hex bytes and parses back from them.
///
/// ```ignore
/// test_record! {
///     AreaSlot => live: AreaSlot { owned: true, name_offset: 0x120 }
///         => "01000000000000002001000000000000"
/// }
/// ```
#[macro_export]
macro_rules! test_record {
    (
        $ty:ident => $test_name:ident: $value:expr => $hex:expr
    ) => {
        $crate::pastey::paste! {
            #[test]
            fn [<test_ $ty:snake _ $test_name:snake _write>]() {
                use $crate::binrw::BinWriterExt;
                let mut cursor = ::std::io::Cursor::new(Vec::new());
                cursor.write_le(&$value).unwrap();
                assert_eq!(cursor.into_inner(), $crate::hex_to_bytes($hex));
            }

            #[test]
            fn [<test_ $ty:snake _ $test_name:snake _read>]() {
                use $crate::binrw::BinReaderExt;
                let mut cursor = ::std::io::Cursor::new($crate::hex_to_bytes($hex));
                let parsed: $ty = cursor.read_le().unwrap();
                assert_eq!(parsed, $value);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("00ff17"), vec![0x00, 0xff, 0x17]);
        assert_eq!(hex_to_bytes(""), Vec::<u8>::new());
    }
}
