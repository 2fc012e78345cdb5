use crate::{
    marshal::{Encode, FourCC},
    r#box::{BoxData, BoxHeader, BoxVariant, HandlerBox},
};

/// Handle of a box inside a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoxId(usize);

#[derive(Debug, Clone)]
struct Node {
    header: BoxHeader,
    data: BoxData,
    parent: Option<BoxId>,
    children: Vec<BoxId>,
}

/// Arena of boxes.
///
/// Boxes are never freed: a detached box keeps its handle but is no longer reachable from the
/// roots, so it is neither found nor written.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    roots: Vec<BoxId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a box with the given header as the last child of `parent`, or as the last root.
    pub fn add(&mut self, parent: Option<BoxId>, header: BoxHeader, data: BoxData) -> BoxId {
        let id = BoxId(self.nodes.len());
        self.nodes.push(Node {
            header,
            data,
            parent,
            children: vec![],
        });
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Appends a new box; its size is set by the next [`Tree::update`].
    pub fn create(
        &mut self,
        parent: Option<BoxId>,
        box_type: FourCC,
        data: impl Into<BoxData>,
    ) -> BoxId {
        self.add(parent, BoxHeader::new(box_type), data.into())
    }

    /// Appends a new container box.
    pub fn create_container(&mut self, parent: Option<BoxId>, box_type: FourCC) -> BoxId {
        self.add(parent, BoxHeader::new(box_type), BoxData::Container)
    }

    /// Unlinks a box and its subtree from its parent.
    pub fn detach(&mut self, id: BoxId) {
        match self.nodes[id.0].parent.take() {
            Some(parent) => self.nodes[parent.0].children.retain(|&child| child != id),
            None => self.roots.retain(|&root| root != id),
        }
    }

    /// Deep copies the subtree at `id` of `source` below `parent`.
    pub fn graft(&mut self, parent: Option<BoxId>, source: &Tree, id: BoxId) -> BoxId {
        let node = &source.nodes[id.0];
        let copy = self.add(parent, node.header.clone(), node.data.clone());
        for &child in &node.children {
            self.graft(Some(copy), source, child);
        }
        copy
    }

    pub fn roots(&self) -> &[BoxId] {
        &self.roots
    }

    /// Replaces the top-level order, boxes left out become detached.
    ///
    /// Nested boxes in `roots` are moved out of their parent.
    pub fn set_roots(&mut self, roots: Vec<BoxId>) {
        for &root in &roots {
            if let Some(parent) = self.nodes[root.0].parent.take() {
                self.nodes[parent.0].children.retain(|&child| child != root);
            }
        }
        self.roots = roots;
    }

    pub fn header(&self, id: BoxId) -> &BoxHeader {
        &self.nodes[id.0].header
    }

    pub fn header_mut(&mut self, id: BoxId) -> &mut BoxHeader {
        &mut self.nodes[id.0].header
    }

    pub fn box_type(&self, id: BoxId) -> FourCC {
        self.nodes[id.0].header.box_type
    }

    pub fn data(&self, id: BoxId) -> &BoxData {
        &self.nodes[id.0].data
    }

    pub fn data_mut(&mut self, id: BoxId) -> &mut BoxData {
        &mut self.nodes[id.0].data
    }

    pub fn get_as<T: BoxVariant>(&self, id: BoxId) -> Option<&T> {
        T::from_data(&self.nodes[id.0].data)
    }

    pub fn get_as_mut<T: BoxVariant>(&mut self, id: BoxId) -> Option<&mut T> {
        T::from_data_mut(&mut self.nodes[id.0].data)
    }

    pub fn parent(&self, id: BoxId) -> Option<BoxId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: BoxId) -> &[BoxId] {
        &self.nodes[id.0].children
    }

    /// First direct child of the given type, or first root if `id` is `None`.
    pub fn child(&self, id: Option<BoxId>, box_type: FourCC) -> Option<BoxId> {
        self.level(id)
            .iter()
            .copied()
            .find(|&child| self.box_type(child) == box_type)
    }

    /// Follows a chain of child types, e.g. `[moov, mvhd]` from the roots.
    pub fn path(&self, from: Option<BoxId>, path: &[FourCC]) -> Option<BoxId> {
        let mut id = from;
        for &box_type in path {
            id = Some(self.child(id, box_type)?);
        }
        id
    }

    /// Every box below `id` in pre-order, or every reachable box if `id` is `None`.
    pub fn descendants(&self, id: Option<BoxId>) -> Vec<BoxId> {
        let mut descendants = vec![];
        let mut stack: Vec<BoxId> = match id {
            Some(id) => self.children(id).iter().rev().copied().collect(),
            None => self.roots.iter().rev().copied().collect(),
        };
        while let Some(id) = stack.pop() {
            descendants.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        descendants
    }

    /// Direct children of the given type, or matching roots if `id` is `None`.
    pub fn children_of_type(&self, id: Option<BoxId>, box_type: FourCC) -> Vec<BoxId> {
        self.level(id)
            .iter()
            .copied()
            .filter(|&child| box_type == FourCC::ANY || self.box_type(child) == box_type)
            .collect()
    }

    /// Boxes of the given type below `id`, or below the roots if `id` is `None`.
    ///
    /// Matches among the direct children win; only if there are none is every child searched
    /// in turn. [`FourCC::ANY`] matches every type.
    pub fn find(&self, id: Option<BoxId>, box_type: FourCC) -> Vec<BoxId> {
        let found = self.children_of_type(id, box_type);
        if !found.is_empty() {
            return found;
        }
        self.level(id)
            .iter()
            .flat_map(|&child| self.find(Some(child), box_type))
            .collect()
    }

    /// First match of [`Tree::find`].
    pub fn find_first(&self, id: Option<BoxId>, box_type: FourCC) -> Option<BoxId> {
        if let Some(found) = self.child(id, box_type) {
            return Some(found);
        }
        self.level(id)
            .iter()
            .find_map(|&child| self.find_first(Some(child), box_type))
    }

    fn level(&self, id: Option<BoxId>) -> &[BoxId] {
        match id {
            Some(id) => self.children(id),
            None => self.roots(),
        }
    }

    /// Nearest enclosing box of the given type, `id` itself included.
    pub fn ancestor(&self, id: BoxId, box_type: FourCC) -> Option<BoxId> {
        let mut current = Some(id);
        while let Some(id) = current {
            if self.box_type(id) == box_type {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    /// Handler type of the track enclosing `id`, taken from its `mdia/hdlr`.
    pub fn handler_type(&self, id: BoxId) -> Option<FourCC> {
        let media = self.ancestor(id, FourCC::mdia)?;
        let handler = self.child(Some(media), FourCC::hdlr)?;
        self.get_as::<HandlerBox>(handler)
            .map(|handler| handler.handler_type)
    }

    /// Recomputes the declared size of every reachable box from its fields and children.
    ///
    /// Media data and skipped payloads keep their declared size.
    pub fn update(&mut self) {
        for root in self.roots.clone() {
            self.update_box(root);
        }
    }

    /// Recomputes the declared sizes of `id` and its subtree, returning its total size.
    pub fn update_box(&mut self, id: BoxId) -> u64 {
        let children = self.nodes[id.0].children.clone();
        let children_len: u64 = children.iter().map(|&child| self.update_box(child)).sum();

        let node = &mut self.nodes[id.0];
        if !node.data.is_opaque() {
            node.data.set_entry_count(children.len() as u32);
            let payload_len = node.data.size() + children_len;
            node.header.set_payload_len(payload_len);
        }
        node.header
            .total_len()
            .unwrap_or_else(|| node.header.header_len())
    }

    /// Declared total size of the reachable boxes, header included.
    pub fn len(&self) -> u64 {
        self.roots
            .iter()
            .map(|&root| {
                let header = self.header(root);
                header.total_len().unwrap_or_else(|| header.size())
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
