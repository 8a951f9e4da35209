//! In-memory document tree and the handler that builds it from parse events.

use crate::handler::{Attribute, ContentHandler};
use crate::memory::Allocation;
use crate::push::Syntax;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsetEntry {
    Entity { name: String, value: String },
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctype {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub subset: Vec<SubsetEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        name: String,
        attributes: Vec<Attribute>,
        implied: bool,
    },
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
    EntityRef(String),
    Doctype(Doctype),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A parsed document. Nodes live in an arena indexed by [`NodeId`].
#[derive(Debug)]
pub struct Document {
    syntax: Syntax,
    version: Option<String>,
    encoding: Option<String>,
    standalone: Option<bool>,
    nodes: Vec<Node>,
    top: Vec<NodeId>,
    usage: Allocation,
}

impl Document {
    #[must_use]
    pub fn new(syntax: Syntax) -> Self {
        Self {
            syntax,
            version: None,
            encoding: None,
            standalone: None,
            nodes: Vec::new(),
            top: Vec::new(),
            usage: Allocation::new(std::mem::size_of::<Self>()),
        }
    }

    #[must_use]
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    #[must_use]
    pub fn is_html(&self) -> bool {
        self.syntax == Syntax::Html
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    #[must_use]
    pub fn standalone(&self) -> Option<bool> {
        self.standalone
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Children of `parent`, or the top-level nodes for `None`.
    #[must_use]
    pub fn children(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.nodes[id].children,
            None => &self.top,
        }
    }

    /// The document element.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.top
            .iter()
            .copied()
            .find(|&id| matches!(self.nodes[id].kind, NodeKind::Element { .. }))
    }

    #[must_use]
    pub fn doctype(&self) -> Option<&Doctype> {
        self.top.iter().find_map(|&id| match &self.nodes[id].kind {
            NodeKind::Doctype(doctype) => Some(doctype),
            _ => None,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first traversal in document order.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            doc: self,
            stack: vec![Frame {
                siblings: &self.top,
                next: 0,
            }],
        }
    }

    fn push(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.usage
            .grow(std::mem::size_of::<Node>() + payload_len(&kind));
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None => self.top.push(id),
        }
        id
    }

    fn last_child_mut(&mut self, parent: Option<NodeId>) -> Option<&mut NodeKind> {
        let last = *self.children(parent).last()?;
        Some(&mut self.nodes[last].kind)
    }

    fn doctype_mut(&mut self) -> Option<&mut Doctype> {
        let id = self
            .top
            .iter()
            .copied()
            .find(|&id| matches!(self.nodes[id].kind, NodeKind::Doctype(_)))?;
        match &mut self.nodes[id].kind {
            NodeKind::Doctype(doctype) => Some(doctype),
            _ => None,
        }
    }
}

fn payload_len(kind: &NodeKind) -> usize {
    match kind {
        NodeKind::Element {
            name, attributes, ..
        } => {
            name.len()
                + attributes
                    .iter()
                    .map(|a| a.name.len() + a.value.as_ref().map_or(0, String::len))
                    .sum::<usize>()
        }
        NodeKind::Text(s) | NodeKind::CData(s) | NodeKind::Comment(s) | NodeKind::EntityRef(s) => {
            s.len()
        }
        NodeKind::ProcessingInstruction { target, data } => target.len() + data.len(),
        NodeKind::Doctype(d) => d.name.len(),
    }
}

/// One step of [`Document::walk`]. Elements with children are visited twice:
/// once on entry and once, with `closing` set, after their last descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStep {
    pub node: NodeId,
    pub depth: usize,
    pub closing: bool,
}

#[derive(Debug)]
struct Frame<'a> {
    siblings: &'a [NodeId],
    next: usize,
}

#[derive(Debug)]
pub struct Walk<'a> {
    doc: &'a Document,
    stack: Vec<Frame<'a>>,
}

impl Iterator for Walk<'_> {
    type Item = WalkStep;

    fn next(&mut self) -> Option<WalkStep> {
        let doc = self.doc;
        let depth = self.stack.len().checked_sub(1)?;
        let frame = self.stack.last_mut()?;
        if let Some(&id) = frame.siblings.get(frame.next) {
            frame.next += 1;
            let children = &doc.nodes[id].children;
            if !children.is_empty() {
                self.stack.push(Frame {
                    siblings: children,
                    next: 0,
                });
            }
            return Some(WalkStep {
                node: id,
                depth,
                closing: false,
            });
        }
        self.stack.pop();
        let parent_frame = self.stack.last()?;
        Some(WalkStep {
            node: parent_frame.siblings[parent_frame.next - 1],
            depth: depth - 1,
            closing: true,
        })
    }
}

/// [`ContentHandler`] that assembles a [`Document`].
///
/// Adjacent character runs are merged into one text node and CDATA
/// continuations are appended to the block they continue, so the tree is
/// independent of how the input was chunked.
#[derive(Debug)]
pub struct TreeBuilder {
    doc: Document,
    open: Vec<NodeId>,
}

impl TreeBuilder {
    #[must_use]
    pub fn new(syntax: Syntax) -> Self {
        Self {
            doc: Document::new(syntax),
            open: Vec::new(),
        }
    }

    #[must_use]
    pub fn into_document(self) -> Document {
        self.doc
    }

    fn current(&self) -> Option<NodeId> {
        self.open.last().copied()
    }
}

impl ContentHandler for TreeBuilder {
    fn xml_declaration(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        self.doc.version = Some(version.to_owned());
        self.doc.encoding = encoding.map(str::to_owned);
        self.doc.standalone = standalone;
    }

    fn internal_subset(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {
        if !self.open.is_empty() || self.doc.doctype().is_some() {
            return;
        }
        self.doc.push(
            None,
            NodeKind::Doctype(Doctype {
                name: name.to_owned(),
                public_id: public_id.map(str::to_owned),
                system_id: system_id.map(str::to_owned),
                subset: Vec::new(),
            }),
        );
    }

    fn entity_decl(&mut self, name: &str, value: &str) {
        if let Some(doctype) = self.doc.doctype_mut() {
            doctype.subset.push(SubsetEntry::Entity {
                name: name.to_owned(),
                value: value.to_owned(),
            });
        }
    }

    fn start_element(&mut self, name: &str, attributes: &[Attribute], implied: bool) {
        let id = self.doc.push(
            self.current(),
            NodeKind::Element {
                name: name.to_owned(),
                attributes: attributes.to_vec(),
                implied,
            },
        );
        self.open.push(id);
    }

    fn end_element(&mut self, _name: &str) {
        self.open.pop();
    }

    fn characters(&mut self, text: &str) {
        let parent = self.current();
        if let Some(NodeKind::Text(existing)) = self.doc.last_child_mut(parent) {
            existing.push_str(text);
            self.doc.usage.grow(text.len());
            return;
        }
        self.doc.push(parent, NodeKind::Text(text.to_owned()));
    }

    fn reference(&mut self, name: &str) {
        self.doc
            .push(self.current(), NodeKind::EntityRef(name.to_owned()));
    }

    fn cdata_block(&mut self, data: &str, continuation: bool) {
        let parent = self.current();
        if continuation && let Some(NodeKind::CData(existing)) = self.doc.last_child_mut(parent) {
            existing.push_str(data);
            self.doc.usage.grow(data.len());
            return;
        }
        self.doc.push(parent, NodeKind::CData(data.to_owned()));
    }

    fn comment(&mut self, text: &str, in_subset: bool) {
        if in_subset {
            if let Some(doctype) = self.doc.doctype_mut() {
                doctype.subset.push(SubsetEntry::Comment(text.to_owned()));
            }
            return;
        }
        self.doc
            .push(self.current(), NodeKind::Comment(text.to_owned()));
    }

    fn processing_instruction(&mut self, target: &str, data: &str) {
        self.doc.push(
            self.current(),
            NodeKind::ProcessingInstruction {
                target: target.to_owned(),
                data: data.to_owned(),
            },
        );
    }
}
