use crate::{
    marshal::FourCC,
    r#box::{AppleItemBox, FileTypeBox, HandlerBox, MetaBox},
    tree::{BoxId, Tree},
};

/// File type and iTunes tags written to an extracted or remuxed movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Info {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub album: Option<String>,
    /// JPEG or PNG image.
    pub cover: Option<Vec<u8>>,
}

impl Default for Mp4Info {
    fn default() -> Self {
        Self {
            major_brand: FourCC::isom,
            minor_version: 0,
            compatible_brands: vec![FourCC::isom, FourCC::mp42],
            title: None,
            author: None,
            album: None,
            cover: None,
        }
    }
}

impl Mp4Info {
    /// Metadata for an iTunes audio file.
    pub fn audio(
        title: Option<String>,
        author: Option<String>,
        album: Option<String>,
        cover: Option<Vec<u8>>,
    ) -> Self {
        Self {
            major_brand: FourCC::M4A_,
            minor_version: 0,
            compatible_brands: vec![FourCC::M4A_, FourCC::mp42, FourCC::isom, FourCC::new(&[0; 4])],
            title,
            author,
            album,
            cover,
        }
    }

    pub(crate) fn file_type(&self) -> FileTypeBox {
        FileTypeBox {
            major_brand: self.major_brand,
            minor_version: self.minor_version,
            compatible_brands: self.compatible_brands.clone(),
        }
    }

    pub(crate) fn cover_len(&self) -> u64 {
        self.cover.as_ref().map_or(0, |cover| cover.len() as u64)
    }

    /// Appends `udta/meta` with the `mdir` handler and the item list to `moov`.
    pub(crate) fn create_user_data(&self, tree: &mut Tree, moov: BoxId) -> BoxId {
        let udta = tree.create_container(Some(moov), FourCC::udta);
        let meta = tree.create(Some(udta), FourCC::meta, MetaBox::default());

        let mut hdlr = HandlerBox::new(FourCC::mdir, "");
        hdlr.reserved[0] = u32::from_be_bytes(FourCC::appl.to_bytes());
        tree.create(Some(meta), FourCC::hdlr, hdlr);

        let ilst = tree.create_container(Some(meta), FourCC::ilst);
        let text_items = [
            (FourCC::Cnam, &self.title),
            (FourCC::CART, &self.author),
            (FourCC::aART, &self.author),
            (FourCC::Calb, &self.album),
        ];
        for (box_type, text) in text_items {
            if let Some(text) = text.as_deref().filter(|text| !text.is_empty()) {
                tree.create(Some(ilst), box_type, AppleItemBox::from_text(text));
            }
        }
        tree.create(Some(ilst), FourCC::stik, AppleItemBox::from_integer(1, 1));
        if let Some(cover) = self.cover.as_ref().filter(|cover| !cover.is_empty()) {
            tree.create(Some(ilst), FourCC::covr, AppleItemBox::from_image(cover.clone()));
        }
        udta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_brands() {
        let info = Mp4Info::audio(None, None, None, None);
        let ftyp = info.file_type();
        assert_eq!(ftyp.major_brand.to_string(), "M4A ");
        assert_eq!(ftyp.compatible_brands.len(), 4);
        assert_eq!(ftyp.compatible_brands[3], FourCC::new(&[0; 4]));
    }

    #[test]
    fn user_data_layout() {
        let info = Mp4Info::audio(
            Some("Song".into()),
            Some("Band".into()),
            Some(String::new()),
            Some(b"\x89PNG\r\n\x1a\n".to_vec()),
        );
        let mut tree = Tree::new();
        let moov = tree.create_container(None, FourCC::moov);
        info.create_user_data(&mut tree, moov);

        let hdlr = tree
            .path(None, &[FourCC::moov, FourCC::udta, FourCC::meta, FourCC::hdlr])
            .unwrap();
        let hdlr = tree.get_as::<HandlerBox>(hdlr).unwrap();
        assert_eq!(hdlr.handler_type, FourCC::mdir);
        assert_eq!(hdlr.reserved[0].to_be_bytes(), *b"appl");

        let ilst = tree.find_first(None, FourCC::ilst).unwrap();
        let types: Vec<FourCC> = tree.children(ilst).iter().map(|&id| tree.box_type(id)).collect();
        assert_eq!(
            types,
            [FourCC::Cnam, FourCC::CART, FourCC::aART, FourCC::stik, FourCC::covr]
        );
        let covr = tree.child(Some(ilst), FourCC::covr).unwrap();
        assert_eq!(tree.get_as::<AppleItemBox>(covr).unwrap().data_type, AppleItemBox::PNG);
    }
}
