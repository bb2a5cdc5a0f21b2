//! `Encode`/`Decode`: the typed half of the archive framework (spec §4.4).
//! A Rust trait plays the role the C++ source gives to the
//! `serialize`/`save`/`load` overload-resolution dance — the compiler picks
//! the right `impl` at the call site, no runtime reflection involved (spec
//! §9, "Handler dispatch over heterogeneous argument lists").

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use error_stack::Report;
use thallium_types::ThalliumError;

use crate::archive::{DecodeArchive, EncodeArchive};

pub trait Encode {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError>;
}

pub trait Decode: Sized {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError>;
}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl Encode for $t {
                fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
                    archive.write(&self.to_ne_bytes())
                }
            }

            impl Decode for $t {
                fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
                    let mut buf = [0u8; core::mem::size_of::<$t>()];
                    archive.read(&mut buf)?;
                    Ok(<$t>::from_ne_bytes(buf))
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, usize, isize);

impl Encode for bool {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        archive.write(&[u8::from(*self)])
    }
}

impl Decode for bool {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let mut buf = [0u8; 1];
        archive.read(&mut buf)?;
        Ok(buf[0] != 0)
    }
}

fn encode_len<A: EncodeArchive>(
    archive: &mut A,
    len: usize,
) -> error_stack::Result<(), ThalliumError> {
    len.encode(archive)
}

fn decode_len<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<usize, ThalliumError> {
    usize::decode(archive)
}

impl Encode for String {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        encode_len(archive, self.len())?;
        archive.write(self.as_bytes())
    }
}

impl Decode for String {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let len = decode_len(archive)?;
        let bytes = archive.restore_ptr(len)?;
        Self::from_utf8(bytes.to_vec()).map_err(|err| {
            Report::new(ThalliumError::DecodeError {
                expected: "utf-8 string".to_owned(),
                got: err.to_string(),
            })
        })
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        encode_len(archive, self.len())?;
        for item in self {
            item.encode(archive)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let len = decode_len(archive)?;
        let mut items = Self::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            items.push(T::decode(archive)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        match self {
            Some(value) => {
                true.encode(archive)?;
                value.encode(archive)
            }
            None => false.encode(archive),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        if bool::decode(archive)? {
            Ok(Some(T::decode(archive)?))
        } else {
            Ok(None)
        }
    }
}

impl<K: Encode + Eq + Hash, V: Encode> Encode for HashMap<K, V> {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        encode_len(archive, self.len())?;
        for (k, v) in self {
            k.encode(archive)?;
            v.encode(archive)?;
        }
        Ok(())
    }
}

impl<K: Decode + Eq + Hash, V: Decode> Decode for HashMap<K, V> {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let len = decode_len(archive)?;
        let mut map = Self::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            let k = K::decode(archive)?;
            let v = V::decode(archive)?;
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<K: Encode + Ord, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        encode_len(archive, self.len())?;
        for (k, v) in self {
            k.encode(archive)?;
            v.encode(archive)?;
        }
        Ok(())
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let len = decode_len(archive)?;
        let mut map = Self::new();
        for _ in 0..len {
            let k = K::decode(archive)?;
            let v = V::decode(archive)?;
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<T: Encode + Eq + Hash> Encode for HashSet<T> {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        encode_len(archive, self.len())?;
        for item in self {
            item.encode(archive)?;
        }
        Ok(())
    }
}

impl<T: Decode + Eq + Hash> Decode for HashSet<T> {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let len = decode_len(archive)?;
        let mut set = Self::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            set.insert(T::decode(archive)?);
        }
        Ok(set)
    }
}

impl<T: Encode + Ord> Encode for BTreeSet<T> {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        encode_len(archive, self.len())?;
        for item in self {
            item.encode(archive)?;
        }
        Ok(())
    }
}

impl<T: Decode + Ord> Decode for BTreeSet<T> {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let len = decode_len(archive)?;
        let mut set = Self::new();
        for _ in 0..len {
            set.insert(T::decode(archive)?);
        }
        Ok(set)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        for item in self {
            item.encode(archive)?;
        }
        Ok(())
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(archive)?);
        }
        items.try_into().map_err(|_: Vec<T>| {
            Report::new(ThalliumError::DecodeError {
                expected: format!("array of length {N}"),
                got: "wrong length".to_owned(),
            })
        })
    }
}

macro_rules! impl_tuple {
    ($($idx:tt => $name:ident),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            fn encode<A: EncodeArchive>(&self, archive: &mut A) -> error_stack::Result<(), ThalliumError> {
                $(self.$idx.encode(archive)?;)+
                Ok(())
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode<A: DecodeArchive>(archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
                Ok(($($name::decode(archive)?,)+))
            }
        }
    };
}

impl_tuple!(0 => A1);
impl_tuple!(0 => A1, 1 => A2);
impl_tuple!(0 => A1, 1 => A2, 2 => A3);
impl_tuple!(0 => A1, 1 => A2, 2 => A3, 3 => A4);
impl_tuple!(0 => A1, 1 => A2, 2 => A3, 3 => A4, 4 => A5);
impl_tuple!(0 => A1, 1 => A2, 2 => A3, 3 => A4, 4 => A5, 5 => A6);

impl Encode for () {
    fn encode<A: EncodeArchive>(&self, _archive: &mut A) -> error_stack::Result<(), ThalliumError> {
        Ok(())
    }
}

impl Decode for () {
    fn decode<A: DecodeArchive>(_archive: &mut A) -> error_stack::Result<Self, ThalliumError> {
        Ok(())
    }
}
