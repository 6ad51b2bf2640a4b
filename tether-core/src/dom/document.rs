//! In-memory Document
//!
//! A small element tree with the surface the binding layer writes to: id,
//! class list, properties, inline style, dataset and text content.
//!
//! Structural changes of the connected tree are queued as
//! [`MutationRecord`]s and handed to observers in batches by
//! [`Document::flush_mutations`], the way a browser delivers
//! `MutationObserver` records after the current task.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::trace;

use super::{MutationFeed, MutationObserver};

/// A batch entry describing nodes that entered or left the document.
#[derive(Debug, Clone, Default)]
pub struct MutationRecord {
    pub added: Vec<Element>,
    pub removed: Vec<Element>,
}

/// The root of an element tree.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

struct DocumentInner {
    body: RefCell<Option<Element>>,
    pending: RefCell<Vec<MutationRecord>>,
    observers: RefCell<Vec<MutationObserver>>,
}

/// A shared handle to an element node.
#[derive(Clone)]
pub struct Element(Rc<ElementNode>);

/// A reference to an element that does not keep it alive.
#[derive(Clone, Default)]
pub struct WeakElement(Weak<ElementNode>);

struct ElementNode {
    tag: String,
    is_root: bool,
    data: RefCell<ElementData>,
    parent: RefCell<Weak<ElementNode>>,
    children: RefCell<Vec<Element>>,
    document: Weak<DocumentInner>,
    writes: Cell<usize>,
}

#[derive(Default)]
struct ElementData {
    id: Option<String>,
    class_list: IndexSet<String>,
    properties: IndexMap<String, Value>,
    style: IndexMap<String, String>,
    dataset: IndexMap<String, String>,
    text: String,
}

impl Document {
    /// Create a document with an empty `body`.
    pub fn new() -> Self {
        let inner = Rc::new(DocumentInner {
            body: RefCell::new(None),
            pending: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
        });
        let body = Element::with_document("body", true, Rc::downgrade(&inner));
        *inner.body.borrow_mut() = Some(body);
        Self { inner }
    }

    pub fn body(&self) -> Element {
        match &*self.inner.body.borrow() {
            Some(body) => body.clone(),
            None => Element::with_document("body", true, Rc::downgrade(&self.inner)),
        }
    }

    /// Create a detached element owned by this document.
    pub fn create_element(&self, tag: &str) -> Element {
        Element::with_document(tag, false, Rc::downgrade(&self.inner))
    }

    /// Every connected element in document order, `body` included.
    pub fn elements(&self) -> Vec<Element> {
        let mut out = Vec::new();
        self.body().collect_into(&mut out);
        out
    }

    /// Connected elements matching `selector`.
    ///
    /// Supported forms: `#id`, `.class`, and a bare word, which matches an
    /// id first and falls back to the tag name.
    pub fn query_all(&self, selector: &str) -> Vec<Element> {
        let elements = self.elements();
        if let Some(id) = selector.strip_prefix('#') {
            return elements.into_iter().filter(|el| el.id().as_deref() == Some(id)).collect();
        }
        if let Some(class) = selector.strip_prefix('.') {
            return elements.into_iter().filter(|el| el.has_class(class)).collect();
        }
        let by_id: Vec<Element> = elements
            .iter()
            .filter(|el| el.id().as_deref() == Some(selector))
            .cloned()
            .collect();
        if !by_id.is_empty() {
            return by_id;
        }
        elements
            .into_iter()
            .filter(|el| el.tag().eq_ignore_ascii_case(selector))
            .collect()
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<Element> {
        self.elements()
            .into_iter()
            .find(|el| el.id().as_deref() == Some(id))
    }

    /// Number of records waiting for [`Document::flush_mutations`].
    pub fn pending_mutations(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Deliver queued records to every observer, in registration order.
    pub fn flush_mutations(&self) {
        let records = std::mem::take(&mut *self.inner.pending.borrow_mut());
        if records.is_empty() {
            return;
        }
        let observers = self.inner.observers.borrow().clone();
        trace!(records = records.len(), observers = observers.len(), "delivering mutations");
        for observer in observers {
            observer(&records);
        }
    }
}

impl DocumentInner {
    fn queue(&self, record: MutationRecord) {
        self.pending.borrow_mut().push(record);
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationFeed for Document {
    fn observe(&self, observer: MutationObserver) {
        self.inner.observers.borrow_mut().push(observer);
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("elements", &self.elements().len())
            .field("pending", &self.pending_mutations())
            .finish()
    }
}

impl Element {
    fn with_document(tag: &str, is_root: bool, document: Weak<DocumentInner>) -> Self {
        Element(Rc::new(ElementNode {
            tag: tag.to_owned(),
            is_root,
            data: RefCell::new(ElementData::default()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            document,
            writes: Cell::new(0),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Rc::downgrade(&self.0))
    }

    pub fn parent(&self) -> Option<Element> {
        self.0.parent.borrow().upgrade().map(Element)
    }

    pub fn children(&self) -> Vec<Element> {
        self.0.children.borrow().clone()
    }

    /// Whether the element is attached to its document's tree.
    pub fn is_connected(&self) -> bool {
        let mut current = Some(self.clone());
        while let Some(el) = current {
            if el.0.is_root {
                return true;
            }
            current = el.parent();
        }
        false
    }

    fn collect_into(&self, out: &mut Vec<Element>) {
        out.push(self.clone());
        for child in self.children() {
            child.collect_into(out);
        }
    }

    /// Attach `child` as the last child, moving it if it has a parent.
    pub fn append_child(&self, child: &Element) {
        child.detach();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(child.clone());

        if self.is_connected() {
            if let Some(doc) = self.0.document.upgrade() {
                doc.queue(MutationRecord {
                    added: vec![child.clone()],
                    removed: Vec::new(),
                });
            }
        }
    }

    /// Detach the element from its parent.
    pub fn remove(&self) {
        self.detach();
    }

    fn detach(&self) {
        let Some(parent) = self.parent() else {
            return;
        };
        let was_connected = parent.is_connected();
        parent
            .0
            .children
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(&c.0, &self.0));
        *self.0.parent.borrow_mut() = Weak::new();

        if was_connected {
            if let Some(doc) = self.0.document.upgrade() {
                doc.queue(MutationRecord {
                    added: Vec::new(),
                    removed: vec![self.clone()],
                });
            }
        }
    }

    /// Number of values written into this element by bindings.
    pub fn write_count(&self) -> usize {
        self.0.writes.get()
    }

    pub(crate) fn record_write(&self) {
        self.0.writes.set(self.0.writes.get() + 1);
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    pub fn id(&self) -> Option<String> {
        self.0.data.borrow().id.clone()
    }

    pub fn set_id(&self, id: Option<&str>) {
        self.0.data.borrow_mut().id = id.map(str::to_owned);
    }

    pub fn text(&self) -> String {
        self.0.data.borrow().text.clone()
    }

    pub fn set_text(&self, text: &str) {
        self.0.data.borrow_mut().text = text.to_owned();
    }

    pub fn class_list(&self) -> Vec<String> {
        self.0.data.borrow().class_list.iter().cloned().collect()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.0.data.borrow().class_list.contains(class)
    }

    pub fn add_class(&self, class: &str) {
        self.0.data.borrow_mut().class_list.insert(class.to_owned());
    }

    pub fn remove_class(&self, class: &str) {
        self.0.data.borrow_mut().class_list.shift_remove(class);
    }

    /// Flip a class; returns whether it is present afterwards.
    pub fn toggle_class(&self, class: &str) -> bool {
        let mut data = self.0.data.borrow_mut();
        if data.class_list.shift_remove(class) {
            false
        } else {
            data.class_list.insert(class.to_owned());
            true
        }
    }

    /// Swap `old` for `new` in place. Returns `false` if `old` is absent.
    ///
    /// If `new` is already present it stays where it is and `old` is
    /// simply removed.
    pub fn replace_class(&self, old: &str, new: &str) -> bool {
        let mut data = self.0.data.borrow_mut();
        let Some(index) = data.class_list.get_index_of(old) else {
            return false;
        };
        if old == new {
            return true;
        }
        data.class_list.shift_remove_index(index);
        let (inserted, added) = data.class_list.insert_full(new.to_owned());
        if added {
            let last = data.class_list.len() - 1;
            data.class_list.move_index(inserted, index.min(last));
        }
        true
    }

    pub fn set_class_name(&self, class_name: &str) {
        let mut data = self.0.data.borrow_mut();
        data.class_list = class_name.split_whitespace().map(str::to_owned).collect();
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.0.data.borrow().properties.get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.0.data.borrow_mut().properties.insert(name.to_owned(), value);
    }

    pub fn remove_property(&self, name: &str) {
        self.0.data.borrow_mut().properties.shift_remove(name);
    }

    pub fn style(&self, name: &str) -> Option<String> {
        self.0.data.borrow().style.get(name).cloned()
    }

    pub fn set_style(&self, name: &str, value: Option<&str>) {
        let mut data = self.0.data.borrow_mut();
        match value {
            Some(value) => {
                data.style.insert(name.to_owned(), value.to_owned());
            }
            None => {
                data.style.shift_remove(name);
            }
        }
    }

    pub fn data(&self, name: &str) -> Option<String> {
        self.0.data.borrow().dataset.get(name).cloned()
    }

    pub fn set_data(&self, name: &str, value: Option<&str>) {
        let mut data = self.0.data.borrow_mut();
        match value {
            Some(value) => {
                data.dataset.insert(name.to_owned(), value.to_owned());
            }
            None => {
                data.dataset.shift_remove(name);
            }
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.data.borrow();
        let mut out = f.debug_struct("Element");
        out.field("tag", &self.0.tag);
        if let Some(id) = &data.id {
            out.field("id", id);
        }
        if !data.class_list.is_empty() {
            out.field("class", &data.class_list);
        }
        out.field("connected", &self.is_connected()).finish()
    }
}

impl WeakElement {
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(Element)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn ptr_eq(&self, element: &Element) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&element.0))
    }
}

impl fmt::Debug for WeakElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(el) => f.debug_tuple("WeakElement").field(&el).finish(),
            None => f.write_str("WeakElement(<dropped>)"),
        }
    }
}
