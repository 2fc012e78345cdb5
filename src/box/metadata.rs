use std::io::{Read, Write};

use derivative::Derivative;

use crate::{
    marshal::{decode_remaining, Decode, Encode, FourCC, FullBoxHeader},
    r#box::{read_prefix, ReadFields},
    Error, Result,
};

// 8.11.1
/// Metadata container; the handler and item list follow as child boxes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetaBox {
    pub header: FullBoxHeader,
}

impl ReadFields for MetaBox {
    fn read(
        &mut self,
        box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        *self = read_prefix(box_type, input, len, 4, buf)?;
        Ok(())
    }
}

impl Encode for MetaBox {
    fn size(&self) -> u64 {
        4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)
    }
}

impl Decode for MetaBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
        })
    }
}

/// iTunes style metadata item, holding a single `data` box.
///
/// Any bytes after the first `data` box are kept in `trailing` and written back unchanged.
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct AppleItemBox {
    pub data_type: u32,
    pub locale: u32,
    #[derivative(Debug = "ignore")]
    pub value: Vec<u8>,
    #[derivative(Debug = "ignore")]
    pub trailing: Vec<u8>,
}

impl AppleItemBox {
    pub const IMPLICIT: u32 = 0;
    pub const UTF8: u32 = 1;
    pub const UTF16: u32 = 2;
    pub const JPEG: u32 = 13;
    pub const PNG: u32 = 14;
    pub const BE_SIGNED_INTEGER: u32 = 21;

    const KNOWN: [FourCC; 11] = [
        FourCC::Cnam,
        FourCC::CART,
        FourCC::aART,
        FourCC::Calb,
        FourCC::Ccmt,
        FourCC::Cgen,
        FourCC::Cday,
        FourCC::gnre,
        FourCC::trkn,
        FourCC::stik,
        FourCC::covr,
    ];

    pub fn is_known(box_type: FourCC) -> bool {
        Self::KNOWN.contains(&box_type)
    }

    pub fn new(data_type: u32, value: Vec<u8>) -> Self {
        Self {
            data_type,
            value,
            ..Default::default()
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::new(Self::UTF8, text.as_bytes().to_vec())
    }

    pub fn from_integer(value: i64, len: usize) -> Self {
        let bytes = value.to_be_bytes();
        Self::new(Self::BE_SIGNED_INTEGER, bytes[8 - len.min(8)..].to_vec())
    }

    /// Image item, typed by sniffing the PNG signature.
    pub fn from_image(data: Vec<u8>) -> Self {
        let data_type = if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Self::PNG
        } else {
            Self::JPEG
        };
        Self::new(data_type, data)
    }

    pub fn text(&self) -> Option<String> {
        match self.data_type {
            Self::UTF8 => Some(String::from_utf8_lossy(&self.value).into_owned()),
            Self::UTF16 => {
                let units: Vec<u16> = self
                    .value
                    .chunks_exact(2)
                    .map(|unit| u16::from_be_bytes([unit[0], unit[1]]))
                    .collect();
                Some(String::from_utf16_lossy(&units))
            }
            _ => None,
        }
    }

    /// Big-endian signed value of 1 to 8 bytes.
    pub fn integer(&self) -> Option<i64> {
        if !matches!(self.data_type, Self::BE_SIGNED_INTEGER | Self::IMPLICIT)
            || self.value.is_empty()
            || self.value.len() > 8
        {
            return None;
        }
        let fill = if self.value[0] & 0x80 != 0 { 0xFF } else { 0 };
        let mut bytes = [fill; 8];
        bytes[8 - self.value.len()..].copy_from_slice(&self.value);
        Some(i64::from_be_bytes(bytes))
    }
}

impl Encode for AppleItemBox {
    fn size(&self) -> u64 {
        4 + 4 + 4 + 4 + self.value.len() as u64 + self.trailing.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        (4 + 4 + 4 + 4 + self.value.len() as u32).encode(output)?; // size
        FourCC::data.encode(output)?;
        self.data_type.encode(output)?;
        self.locale.encode(output)?;
        output.write_all(&self.value)?;
        output.write_all(&self.trailing)?;
        Ok(())
    }
}

impl Decode for AppleItemBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let size = u32::decode(input)? as usize;
        let box_type = FourCC::decode(input)?;
        if box_type != FourCC::data {
            return Err(Error::malformed(
                FourCC::data,
                format!("item holds {box_type} instead"),
            ));
        }
        if size < 16 || size - 8 > input.len() {
            return Err(Error::malformed(
                FourCC::data,
                format!("size {size} does not fit the item"),
            ));
        }
        let data_type = Decode::decode(input)?;
        let locale = Decode::decode(input)?;
        let (value, mut trailing) = input.split_at(size - 16);
        let value = value.to_vec();
        let trailing = decode_remaining(&mut trailing);
        *input = &input[input.len()..];

        Ok(Self {
            data_type,
            locale,
            value,
            trailing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::decode_exact;

    #[test]
    fn text_item() {
        let item = AppleItemBox::from_text("Title");
        let mut data = vec![];
        item.encode(&mut data).unwrap();
        assert_eq!(&data[..8], b"\0\0\0\x15data");
        assert_eq!(data.len() as u64, item.size());

        let decoded = decode_exact::<AppleItemBox>(FourCC::Cnam, &data).unwrap();
        assert_eq!(decoded.text().as_deref(), Some("Title"));
        assert_eq!(decoded.integer(), None);
    }

    #[test]
    fn integer_items() {
        assert_eq!(AppleItemBox::from_integer(1, 1).value, [1]);
        assert_eq!(AppleItemBox::from_integer(-2, 2).integer(), Some(-2));
        assert_eq!(AppleItemBox::new(AppleItemBox::IMPLICIT, vec![0, 17]).integer(), Some(17));
    }

    #[test]
    fn cover_format() {
        assert_eq!(
            AppleItemBox::from_image(b"\x89PNG\r\n\x1a\n....".to_vec()).data_type,
            AppleItemBox::PNG
        );
        assert_eq!(
            AppleItemBox::from_image(vec![0xFF, 0xD8, 0xFF]).data_type,
            AppleItemBox::JPEG
        );
    }

    #[test]
    fn second_data_box_is_kept() {
        let mut data = vec![];
        AppleItemBox::from_image(vec![1, 2]).encode(&mut data).unwrap();
        let first = data.len();
        AppleItemBox::from_image(vec![3]).encode(&mut data).unwrap();

        let decoded = decode_exact::<AppleItemBox>(FourCC::covr, &data).unwrap();
        assert_eq!(decoded.value, [1, 2]);
        assert_eq!(decoded.trailing.len(), data.len() - first);

        let mut encoded = vec![];
        decoded.encode(&mut encoded).unwrap();
        assert_eq!(encoded, data);
    }

    #[test]
    fn foreign_child_is_malformed() {
        let data = b"\0\0\0\x10mean\0\0\0\0\0\0\0\0";
        assert!(decode_exact::<AppleItemBox>(FourCC::Cnam, data).is_err());
    }
}
