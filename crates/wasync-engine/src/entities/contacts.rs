use wasync_core::payloads::ContactPayload;
use wasync_core::EntityKind;
use wasync_store::{ContactRow, RecordPatch};

use super::EntitySpec;
use crate::transform::{self, TransformError};

pub struct Contacts;

impl EntitySpec for Contacts {
    const KIND: EntityKind = EntityKind::Contact;
    type Row = ContactRow;
    type Payload = ContactPayload;
    type Update = ContactPayload;

    fn to_row(contact: &ContactPayload) -> Result<ContactRow, TransformError> {
        Ok(ContactRow {
            id: transform::required("id", &contact.id)?.to_string(),
            name: contact.name.clone(),
            notify: contact.notify.clone(),
            verified_name: contact.verified_name.clone(),
            img_url: contact.img_url.clone(),
            status: contact.status.clone(),
        })
    }

    fn update_id(update: &ContactPayload) -> Result<String, TransformError> {
        transform::required("id", &update.id).map(str::to_string)
    }

    fn to_patch(update: &ContactPayload, _existing: &ContactRow) -> Result<RecordPatch, TransformError> {
        let row = Self::to_row(update)?;
        Ok(RecordPatch::new()
            .set_opt("name", row.name)
            .set_opt("notify", row.notify)
            .set_opt("verified_name", row.verified_name)
            .set_opt("img_url", row.img_url)
            .set_opt("status", row.status))
    }
}
