use wasync_core::events::ParticipantAction;
use wasync_core::payloads::{GroupParticipant, GroupPayload};
use wasync_core::EntityKind;
use wasync_store::{GroupRow, RecordPatch};

use super::EntitySpec;
use crate::transform::{self, TransformError};

pub struct Groups;

impl EntitySpec for Groups {
    const KIND: EntityKind = EntityKind::Group;
    type Row = GroupRow;
    type Payload = GroupPayload;
    type Update = GroupPayload;

    fn to_row(group: &GroupPayload) -> Result<GroupRow, TransformError> {
        Ok(GroupRow {
            id: transform::required("id", &group.id)?.to_string(),
            subject: group.subject.clone(),
            owner: group.owner.clone(),
            description: group.desc.clone(),
            creation: transform::timestamp("creation", group.creation.as_ref())?,
            restrict_settings: group.restrict,
            announce: group.announce,
            size: transform::integer("size", group.size.as_ref())?,
            participants: group.participants.clone(),
        })
    }

    fn update_id(update: &GroupPayload) -> Result<String, TransformError> {
        transform::required("id", &update.id).map(str::to_string)
    }

    fn to_patch(update: &GroupPayload, _existing: &GroupRow) -> Result<RecordPatch, TransformError> {
        let row = Self::to_row(update)?;
        let participants = row
            .participants
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| TransformError::InvalidValue {
                field: "participants",
                detail: e.to_string(),
            })?;
        Ok(RecordPatch::new()
            .set_opt("subject", row.subject)
            .set_opt("owner", row.owner)
            .set_opt("description", row.description)
            .set_opt("creation", row.creation)
            .set_opt("restrict_settings", row.restrict_settings)
            .set_opt("announce", row.announce)
            .set_opt("size", row.size)
            .set_opt("participants", participants))
    }
}

/// New participant list after a membership change.
pub fn apply_participant_action(
    current: &[GroupParticipant],
    members: &[String],
    action: ParticipantAction,
) -> Vec<GroupParticipant> {
    match action {
        ParticipantAction::Add => {
            let mut next = current.to_vec();
            for id in members {
                if !next.iter().any(|p| &p.id == id) {
                    next.push(GroupParticipant {
                        id: id.clone(),
                        admin: None,
                    });
                }
            }
            next
        }
        ParticipantAction::Remove => current
            .iter()
            .filter(|p| !members.contains(&p.id))
            .cloned()
            .collect(),
        ParticipantAction::Promote | ParticipantAction::Demote => current
            .iter()
            .map(|p| {
                if !members.contains(&p.id) {
                    return p.clone();
                }
                GroupParticipant {
                    id: p.id.clone(),
                    admin: match action {
                        ParticipantAction::Promote => Some("admin".into()),
                        _ => None,
                    },
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, admin: Option<&str>) -> GroupParticipant {
        GroupParticipant {
            id: id.into(),
            admin: admin.map(String::from),
        }
    }

    #[test]
    fn add_skips_existing_members() {
        let current = vec![member("a", None)];
        let next = apply_participant_action(
            &current,
            &["a".into(), "b".into()],
            ParticipantAction::Add,
        );
        assert_eq!(next, vec![member("a", None), member("b", None)]);
    }

    #[test]
    fn remove_drops_members() {
        let current = vec![member("a", None), member("b", Some("admin"))];
        let next = apply_participant_action(&current, &["b".into(), "z".into()], ParticipantAction::Remove);
        assert_eq!(next, vec![member("a", None)]);
    }

    #[test]
    fn promote_and_demote_toggle_admin() {
        let current = vec![member("a", None), member("b", Some("superadmin"))];
        let promoted = apply_participant_action(&current, &["a".into()], ParticipantAction::Promote);
        assert_eq!(promoted[0], member("a", Some("admin")));
        assert_eq!(promoted[1], member("b", Some("superadmin")));

        let demoted = apply_participant_action(&promoted, &["a".into(), "b".into()], ParticipantAction::Demote);
        assert!(demoted.iter().all(|p| p.admin.is_none()));
    }

    #[test]
    fn patch_serializes_participants() {
        let update = GroupPayload {
            id: "g1".into(),
            participants: Some(vec![member("a", None)]),
            ..Default::default()
        };
        let patch = Groups::to_patch(&update, &GroupRow::default()).unwrap();
        assert_eq!(patch.len(), 1);
        assert!(patch.get("participants").is_some());
    }
}
