use std::{
    fmt::{Debug, Display, Formatter},
    io::Write,
    str::FromStr,
};

use bstringify::bstringify;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use fixed::types::{U16F16, U2F30, U8F8};
use fixed_macro::types::{U16F16, U2F30};

use crate::{Error, Result};

pub trait Encode {
    fn size(&self) -> u64;

    fn encode(&self, output: &mut impl Write) -> Result<()>;
}

pub trait Decode: Sized {
    fn decode(input: &mut &[u8]) -> Result<Self>;
}

macro_rules! impl_integer {
    ($($type:ty: $size:literal $read:ident $write:ident),* $(,)?) => {
        $(
            impl Encode for $type {
                fn size(&self) -> u64 {
                    $size
                }

                fn encode(&self, output: &mut impl Write) -> Result<()> {
                    output.$write::<BigEndian>(*self)?;
                    Ok(())
                }
            }

            impl Decode for $type {
                fn decode(input: &mut &[u8]) -> Result<Self> {
                    Ok(input.$read::<BigEndian>()?)
                }
            }
        )*
    };
}

impl_integer! {
    u16: 2 read_u16 write_u16,
    i16: 2 read_i16 write_i16,
    u32: 4 read_u32 write_u32,
    i32: 4 read_i32 write_i32,
    u64: 8 read_u64 write_u64,
    i64: 8 read_i64 write_i64,
}

impl Encode for u8 {
    fn size(&self) -> u64 {
        1
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        output.write_u8(*self)?;
        Ok(())
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(input.read_u8()?)
    }
}

impl Encode for U8F8 {
    fn size(&self) -> u64 {
        2
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        output.write_u16::<BigEndian>(self.to_bits())?;
        Ok(())
    }
}

impl Decode for U8F8 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self::from_bits(input.read_u16::<BigEndian>()?))
    }
}

impl Encode for U16F16 {
    fn size(&self) -> u64 {
        4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        output.write_u32::<BigEndian>(self.to_bits())?;
        Ok(())
    }
}

impl Decode for U16F16 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self::from_bits(input.read_u32::<BigEndian>()?))
    }
}

impl Encode for U2F30 {
    fn size(&self) -> u64 {
        4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        output.write_u32::<BigEndian>(self.to_bits())?;
        Ok(())
    }
}

impl Decode for U2F30 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self::from_bits(input.read_u32::<BigEndian>()?))
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn size(&self) -> u64 {
        N as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        output.write_all(self)?;
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let mut value = [0; N];
        std::io::Read::read_exact(input, &mut value)?;
        Ok(value)
    }
}

/// Takes every remaining byte of the payload.
pub fn decode_remaining(input: &mut &[u8]) -> Vec<u8> {
    let data = input.to_vec();
    *input = &input[input.len()..];
    data
}

/// Decodes a complete payload, failing if any byte is left over.
pub fn decode_exact<T: Decode>(box_type: FourCC, mut input: &[u8]) -> Result<T> {
    let value = T::decode(&mut input)?;
    if !input.is_empty() {
        return Err(Error::malformed(
            box_type,
            format!("{} trailing bytes", input.len()),
        ));
    }
    Ok(value)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2015 4.2
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FullBoxHeader {
    pub version: u8,
    pub flags: u32,
}

impl FullBoxHeader {
    pub fn new(version: u8, flags: u32) -> Self {
        Self { version, flags }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

impl Encode for FullBoxHeader {
    fn size(&self) -> u64 {
        4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        output.write_u8(self.version)?;
        output.write_u24::<BigEndian>(self.flags)?;
        Ok(())
    }
}

impl Decode for FullBoxHeader {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let version = input.read_u8()?;
        let flags = input.read_u24::<BigEndian>()?;
        Ok(Self { version, flags })
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourCC(pub u32);

macro_rules! four_cc {
    ($($name:ident),* $(,)?) => {
        #[allow(non_upper_case_globals)]
        impl FourCC {
            $(pub const $name: FourCC = FourCC::new(bstringify!($name));)*
        }
    };
}

four_cc! {
    ftyp, free, skip, mdat, uuid,
    moov, mvhd, iods, trak, tkhd, tref, edts, elst, udta,
    mdia, mdhd, hdlr, minf, vmhd, smhd, hmhd, nmhd, dinf, dref,
    stbl, stsd, esds, stts, ctts, stss, stsh, stsc, stsz, stz2, stco, co64, sbgp,
    meta, ilst, data, aART, gnre, trkn, stik, covr,
    mvex, mehd, trex, sidx, moof, mfhd, traf, tfhd, tfdt, trun, mfra,
    soun, vide, mdir, appl, isom, mp42,
}

#[allow(non_upper_case_globals)]
impl FourCC {
    /// Matches every box type where a type filter is expected.
    pub const ANY: FourCC = FourCC(0);

    pub const url_: FourCC = FourCC::new(b"url ");
    pub const urn_: FourCC = FourCC::new(b"urn ");
    pub const M4A_: FourCC = FourCC::new(b"M4A ");

    pub const Cnam: FourCC = FourCC::new(&[0xA9, b'n', b'a', b'm']);
    pub const CART: FourCC = FourCC::new(&[0xA9, b'A', b'R', b'T']);
    pub const Calb: FourCC = FourCC::new(&[0xA9, b'a', b'l', b'b']);
    pub const Ccmt: FourCC = FourCC::new(&[0xA9, b'c', b'm', b't']);
    pub const Cgen: FourCC = FourCC::new(&[0xA9, b'g', b'e', b'n']);
    pub const Cday: FourCC = FourCC::new(&[0xA9, b'd', b'a', b'y']);

    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*bytes))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Latin-1, so that 0xA9 prints as '©'
        let name: String = self.to_bytes().iter().map(|&c| c as char).collect();
        f.write_str(&name)
    }
}

impl Debug for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.to_string(), f)
    }
}

impl FromStr for FourCC {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = s
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect::<Option<Vec<u8>>>()
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .ok_or_else(|| Error::InvalidFourCC(s.to_owned()))?;
        Ok(Self::new(&bytes))
    }
}

impl Encode for FourCC {
    fn size(&self) -> u64 {
        4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.0.encode(output)
    }
}

impl Decode for FourCC {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self(Decode::decode(input)?))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2015 8.4.2.3, ISO 639-2/T packed into 3 x 5 bits
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Language(pub u16);

impl Language {
    pub fn code(&self) -> String {
        let bytes = self.0.to_be_bytes();
        let c0 = (bytes[0] >> 2 & 0x1F) + 0x60;
        let c1 = (((bytes[0] & 0x3) << 3) | (bytes[1] >> 5)) + 0x60;
        let c2 = (bytes[1] & 0x1F) + 0x60;
        [c0, c1, c2].iter().map(|&c| c as char).collect()
    }
}

impl Debug for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_lowercase) {
            return Err(Error::InvalidLanguage(s.to_owned()));
        }
        let packed = bytes
            .iter()
            .fold(0u16, |packed, &c| packed << 5 | (c - 0x60) as u16);
        Ok(Self(packed))
    }
}

impl Encode for Language {
    fn size(&self) -> u64 {
        2
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.0.encode(output)
    }
}

impl Decode for Language {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self(Decode::decode(input)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matrix {
    pub a: U16F16,
    pub b: U16F16,
    pub u: U2F30,
    pub c: U16F16,
    pub d: U16F16,
    pub v: U2F30,
    pub x: U16F16,
    pub y: U16F16,
    pub w: U2F30,
}

impl Matrix {
    pub fn identity() -> Self {
        Self {
            a: U16F16!(1),
            b: U16F16!(0),
            u: U2F30!(0),
            c: U16F16!(0),
            d: U16F16!(1),
            v: U2F30!(0),
            x: U16F16!(0),
            y: U16F16!(0),
            w: U2F30!(1),
        }
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Encode for Matrix {
    fn size(&self) -> u64 {
        9 * 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.a.encode(output)?;
        self.b.encode(output)?;
        self.u.encode(output)?;
        self.c.encode(output)?;
        self.d.encode(output)?;
        self.v.encode(output)?;
        self.x.encode(output)?;
        self.y.encode(output)?;
        self.w.encode(output)
    }
}

impl Decode for Matrix {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            a: Decode::decode(input)?,
            b: Decode::decode(input)?,
            u: Decode::decode(input)?,
            c: Decode::decode(input)?,
            d: Decode::decode(input)?,
            v: Decode::decode(input)?,
            x: Decode::decode(input)?,
            y: Decode::decode(input)?,
            w: Decode::decode(input)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_cc_latin1() {
        assert_eq!(FourCC::Cnam.to_string(), "©nam");
        assert_eq!("©nam".parse::<FourCC>().unwrap(), FourCC::Cnam);
        assert_eq!("url ".parse::<FourCC>().unwrap(), FourCC::url_);
        assert_eq!(FourCC::ftyp.to_bytes(), *b"ftyp");
        assert!("mp4".parse::<FourCC>().is_err());
        assert!("mp4a1".parse::<FourCC>().is_err());
    }

    #[test]
    fn language_packing() {
        let eng: Language = "eng".parse().unwrap();
        assert_eq!(eng.0, 0x15C7);
        assert_eq!(eng.code(), "eng");
        assert_eq!(Language(0x55C4).code(), "und");
        assert!("EN".parse::<Language>().is_err());
    }

    #[test]
    fn full_box_header() {
        let mut data = vec![];
        FullBoxHeader::new(1, 0x000305).encode(&mut data).unwrap();
        assert_eq!(data, [1, 0, 3, 5]);

        let header = decode_exact::<FullBoxHeader>(FourCC::tfhd, &data).unwrap();
        assert!(header.has_flag(0x000004));
        assert!(!header.has_flag(0x000002));
        assert!(decode_exact::<FullBoxHeader>(FourCC::tfhd, &[0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn matrix_identity() {
        let mut data = vec![];
        Matrix::identity().encode(&mut data).unwrap();
        assert_eq!(data.len() as u64, Matrix::identity().size());
        assert_eq!(&data[..4], &[0, 1, 0, 0]);
        assert_eq!(&data[32..], &[0x40, 0, 0, 0]);
        assert_eq!(decode_exact::<Matrix>(FourCC::mvhd, &data).unwrap(), Matrix::identity());
    }
}
