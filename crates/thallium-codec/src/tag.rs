//! Optional type tagging (spec §4.4): in a debug build, each top-level
//! `proc_object` encode prepends its type name; decode reads and compares
//! it, failing with `DecodeError` on mismatch. Release builds skip this
//! entirely — no bytes are written or read, so the wire format differs
//! between profiles only if both peers are built with the same profile,
//! matching the original's behavior.

use error_stack::Report;
use thallium_types::ThalliumError;

use crate::archive::{DecodeArchive, EncodeArchive};
use crate::codec::{Decode, Encode};

/// Encode `value` as a top-level object, prefixed with its type name when
/// `debug_assertions` are enabled.
pub fn encode_tagged<T, A>(value: &T, archive: &mut A) -> error_stack::Result<(), ThalliumError>
where
    T: Encode,
    A: EncodeArchive,
{
    #[cfg(debug_assertions)]
    {
        let name = core::any::type_name::<T>();
        name.to_owned().encode(archive)?;
    }
    value.encode(archive)
}

/// Decode a top-level object, checking the type-name tag in debug builds.
pub fn decode_tagged<T, A>(archive: &mut A) -> error_stack::Result<T, ThalliumError>
where
    T: Decode,
    A: DecodeArchive,
{
    #[cfg(debug_assertions)]
    {
        let expected = core::any::type_name::<T>();
        let got = String::decode(archive)?;
        if got != expected {
            return Err(Report::new(ThalliumError::DecodeError {
                expected: expected.to_owned(),
                got,
            }));
        }
    }
    T::decode(archive)
}

#[cfg(all(test, debug_assertions))]
mod tests {
    use super::*;
    use crate::buffer::{BufferDecodeArchive, BufferEncodeArchive};

    #[test]
    fn mismatched_tag_is_rejected() {
        let mut enc = BufferEncodeArchive::<()>::new(());
        encode_tagged(&42u32, &mut enc).unwrap();
        let bytes = enc.into_bytes();

        let mut dec = BufferDecodeArchive::<()>::new(bytes, ());
        let result: error_stack::Result<u64, ThalliumError> = decode_tagged(&mut dec);
        assert!(result.is_err());
    }

    #[test]
    fn matching_tag_round_trips() {
        let mut enc = BufferEncodeArchive::<()>::new(());
        encode_tagged(&42u32, &mut enc).unwrap();
        let bytes = enc.into_bytes();

        let mut dec = BufferDecodeArchive::<()>::new(bytes, ());
        let result: u32 = decode_tagged(&mut dec).unwrap();
        assert_eq!(result, 42);
    }
}
