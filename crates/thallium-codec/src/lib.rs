//! The typed-argument serialization framework (spec §4.4), grounded on
//! `harpc-codec`: an archive interface parameterized by a per-call context,
//! plus a dispatch table of `Encode`/`Decode` impls for built-in types.

mod archive;
mod buffer;
mod codec;
mod tag;

pub use archive::{Archive, DecodeArchive, EncodeArchive, EngineHandle, NullEngineHandle};
pub use buffer::{BufferDecodeArchive, BufferEncodeArchive};
pub use codec::{Decode, Encode};
pub use tag::{decode_tagged, encode_tagged};

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T>(value: T)
    where
        T: Encode + Decode + PartialEq + core::fmt::Debug,
    {
        let mut enc = BufferEncodeArchive::<()>::new(());
        value.encode(&mut enc).unwrap();
        let bytes = enc.into_bytes();

        let mut dec = BufferDecodeArchive::<()>::new(bytes, ());
        let decoded = T::decode(&mut dec).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(0u8);
        round_trip(255u8);
        round_trip(42i32);
        round_trip(-7i64);
        round_trip(core::f64::consts::PI);
        round_trip(true);
        round_trip(false);
    }

    #[test]
    fn strings_round_trip_including_empty() {
        round_trip(String::new());
        round_trip("Matthieu".to_owned());
    }

    #[test]
    fn containers_round_trip_including_empty() {
        round_trip(Vec::<i32>::new());
        round_trip(vec![1, 2, 3]);
        round_trip(Some(5u32));
        round_trip(None::<u32>);
    }

    #[test]
    fn tuples_round_trip() {
        round_trip((1u32, "hi".to_owned(), true));
    }

    #[test]
    fn arrays_round_trip() {
        round_trip([1u32, 2, 3, 4]);
    }

    #[test]
    fn maps_and_sets_round_trip() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        map.insert(1u32, "one".to_owned());
        map.insert(2u32, "two".to_owned());
        round_trip(map);
    }

    #[test]
    fn context_is_readable_during_encode() {
        let mut enc = BufferEncodeArchive::<(i32, f64)>::new((7, 2.0));
        assert_eq!(*enc.context(), (7, 2.0));
        42u32.encode(&mut enc).unwrap();
    }
}
