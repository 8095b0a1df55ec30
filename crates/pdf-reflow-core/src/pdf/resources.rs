//! Page resource lookup shared by the stamper and the image check.

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{Error, Result};

/// Limit on Parent hops when looking for inherited page attributes
pub(super) const MAX_INHERITANCE_DEPTH: usize = 10;

/// Form XObjects are followed this many levels deep when looking for images
const MAX_FORM_DEPTH: usize = 3;

/// The Resources dictionary in effect for a page: its own (inline or
/// referenced), else the nearest ancestor's, else empty.
pub(super) fn resolve_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let page = doc
        .get_object(page_id)
        .map_err(|e| Error::Lopdf(format!("Failed to get page: {e}")))?;

    Ok(page
        .as_dict()
        .ok()
        .and_then(|dict| inherited_attribute(doc, dict, b"Resources", MAX_INHERITANCE_DEPTH))
        .and_then(|obj| resolve_dict_object(doc, &obj))
        .unwrap_or_else(Dictionary::new))
}

pub(super) fn resolve_dict_object(doc: &Document, obj: &Object) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(id) => doc.get_dictionary(*id).ok().cloned(),
        _ => None,
    }
}

/// Look up `key` on `dict`, walking up Parent links for inheritable attributes.
pub(super) fn inherited_attribute(doc: &Document, dict: &Dictionary, key: &[u8], depth: usize) -> Option<Object> {
    if let Ok(value) = dict.get(key) {
        return Some(value.clone());
    }
    if depth == 0 {
        return None;
    }

    let parent_id = dict.get(b"Parent").ok()?.as_reference().ok()?;
    let parent = doc.get_dictionary(parent_id).ok()?;
    inherited_attribute(doc, parent, key, depth - 1)
}

/// Whether the page draws a raster image, directly or through a form XObject
pub(super) fn page_has_images(doc: &Document, page_id: ObjectId) -> Result<bool> {
    let resources = resolve_resources(doc, page_id)?;
    Ok(resources_have_images(doc, &resources, MAX_FORM_DEPTH))
}

fn resources_have_images(doc: &Document, resources: &Dictionary, depth: usize) -> bool {
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| resolve_dict_object(doc, obj))
    else {
        return false;
    };

    xobjects.iter().any(|(_, obj)| {
        let stream = match obj {
            Object::Reference(id) => doc.get_object(*id).ok().and_then(|o| o.as_stream().ok()),
            Object::Stream(stream) => Some(stream),
            _ => None,
        };
        let Some(stream) = stream else {
            return false;
        };

        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Image") => true,
            Ok(b"Form") if depth > 0 => stream
                .dict
                .get(b"Resources")
                .ok()
                .and_then(|obj| resolve_dict_object(doc, obj))
                .is_some_and(|inner| resources_have_images(doc, &inner, depth - 1)),
            _ => false,
        }
    })
}
