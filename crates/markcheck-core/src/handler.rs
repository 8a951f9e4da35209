//! Event interface of the push parser.

/// An attribute as reported by the parser. `value` is `None` only for HTML
/// boolean attributes written without `=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Receiver of parse events. All methods default to doing nothing.
#[allow(unused_variables)]
pub trait ContentHandler {
    fn start_document(&mut self) {}

    fn end_document(&mut self) {}

    fn xml_declaration(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
    }

    /// `<!DOCTYPE name PUBLIC "public" "system"`, reported before any
    /// internal subset declarations.
    fn internal_subset(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {}

    /// Internal general entity declared in the document type declaration.
    fn entity_decl(&mut self, name: &str, value: &str) {}

    /// `implied` is set for elements the loose HTML parser synthesized.
    fn start_element(&mut self, name: &str, attributes: &[Attribute], implied: bool) {}

    fn end_element(&mut self, name: &str) {}

    /// A run of character data. A logical run may arrive in several calls.
    fn characters(&mut self, text: &str) {}

    /// An entity reference left unsubstituted.
    fn reference(&mut self, name: &str) {}

    /// CDATA content. `continuation` is set when this call extends the block
    /// started by the previous call.
    fn cdata_block(&mut self, data: &str, continuation: bool) {}

    fn comment(&mut self, text: &str, in_subset: bool) {}

    fn processing_instruction(&mut self, target: &str, data: &str) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl ContentHandler for NullHandler {}

impl<T: ContentHandler + ?Sized> ContentHandler for &mut T {
    fn start_document(&mut self) {
        (**self).start_document();
    }
    fn end_document(&mut self) {
        (**self).end_document();
    }
    fn xml_declaration(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        (**self).xml_declaration(version, encoding, standalone);
    }
    fn internal_subset(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {
        (**self).internal_subset(name, public_id, system_id);
    }
    fn entity_decl(&mut self, name: &str, value: &str) {
        (**self).entity_decl(name, value);
    }
    fn start_element(&mut self, name: &str, attributes: &[Attribute], implied: bool) {
        (**self).start_element(name, attributes, implied);
    }
    fn end_element(&mut self, name: &str) {
        (**self).end_element(name);
    }
    fn characters(&mut self, text: &str) {
        (**self).characters(text);
    }
    fn reference(&mut self, name: &str) {
        (**self).reference(name);
    }
    fn cdata_block(&mut self, data: &str, continuation: bool) {
        (**self).cdata_block(data, continuation);
    }
    fn comment(&mut self, text: &str, in_subset: bool) {
        (**self).comment(text, in_subset);
    }
    fn processing_instruction(&mut self, target: &str, data: &str) {
        (**self).processing_instruction(target, data);
    }
}
