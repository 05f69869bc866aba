//! Receipt-type handlers.
//!
//! Each handler is pure in (current projection, payload): it inspects the
//! preloaded projection rows and returns the mutations to commit. Combined
//! with the processed-receipts guard this makes application idempotent.

use thiserror::Error;

use budsync_core::{JarId, MemberId, ReceiptPayload};
use budsync_store::{
    ContentItemRecord, JarMemberRecord, JarMemberRole, JarMemberStatus, JarRecord,
    ProjectionMutation,
};

/// Handler constraint violations.
///
/// These are retryable processing errors: a drain retry may succeed once
/// missing context arrives, and repeated failure poisons the queue entry.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("wrong sequence: expected {expected}, got {got}")]
    WrongSequence { expected: u64, got: u64 },

    #[error("jar {0} does not exist")]
    JarMissing(JarId),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("missing target: {0}")]
    MissingTarget(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Projection context preloaded by the engine for one receipt.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub author: MemberId,
    pub jar_id: JarId,
    pub sequence_number: u64,
    pub received_at_ms: i64,
    /// The member row the payload targets, when the type has one.
    pub target_member: Option<JarMemberRecord>,
    /// The content item the payload targets, when the type has one.
    pub content_item: Option<ContentItemRecord>,
}

/// Compute the projection mutations for an applied receipt.
pub fn plan_mutations(
    jar: Option<&JarRecord>,
    payload: &ReceiptPayload,
    ctx: &HandlerContext,
) -> Result<Vec<ProjectionMutation>, HandlerError> {
    match payload {
        ReceiptPayload::JarCreated(p) => {
            if ctx.sequence_number != 1 {
                return Err(HandlerError::WrongSequence {
                    expected: 1,
                    got: ctx.sequence_number,
                });
            }
            if p.owner_member_id != ctx.author {
                return Err(HandlerError::NotAuthorized(
                    "jar.created must be authored by the owner".into(),
                ));
            }
            if p.jar_id != ctx.jar_id {
                return Err(HandlerError::InvalidPayload(
                    "jar.created names a different jar than its envelope".into(),
                ));
            }
            // A jar row that already exists makes this a no-op; the
            // processed index still records the sequence.
            if jar.is_some() {
                return Ok(Vec::new());
            }

            let mut mutations = vec![
                ProjectionMutation::InsertJar {
                    jar_id: p.jar_id,
                    name: p.name.clone(),
                    description: p.description.clone(),
                    owner_member_id: p.owner_member_id.clone(),
                    created_at_ms: p.created_at_ms,
                },
                ProjectionMutation::UpsertMember {
                    member: JarMemberRecord {
                        jar_id: p.jar_id,
                        member_id: p.owner_member_id.clone(),
                        role: JarMemberRole::Owner,
                        status: JarMemberStatus::Active,
                        display_name: None,
                        joined_at_ms: Some(p.created_at_ms),
                        invited_at_ms: None,
                        removed_at_ms: None,
                    },
                },
            ];
            for device in &p.owner_devices {
                mutations.push(ProjectionMutation::PinDevice {
                    member_id: p.owner_member_id.clone(),
                    device_id: device.device_id,
                    pk_sign: device.pk_sign,
                    pk_agree: device.pk_agree,
                    registered_at_ms: ctx.received_at_ms,
                });
            }
            Ok(mutations)
        }

        ReceiptPayload::MemberAdded(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            if p.devices.is_empty() {
                return Err(HandlerError::InvalidPayload(
                    "member_added requires at least one device".into(),
                ));
            }

            let mut mutations = Vec::with_capacity(p.devices.len() + 1);
            for device in &p.devices {
                mutations.push(ProjectionMutation::PinDevice {
                    member_id: p.member_id.clone(),
                    device_id: device.device_id,
                    pk_sign: device.pk_sign,
                    pk_agree: device.pk_agree,
                    registered_at_ms: ctx.received_at_ms,
                });
            }
            mutations.push(ProjectionMutation::UpsertMember {
                member: JarMemberRecord {
                    jar_id: jar.jar_id,
                    member_id: p.member_id.clone(),
                    role: JarMemberRole::Member,
                    status: JarMemberStatus::Pending,
                    display_name: p.display_name.clone(),
                    joined_at_ms: None,
                    invited_at_ms: Some(p.invited_at_ms),
                    removed_at_ms: None,
                },
            });
            Ok(mutations)
        }

        ReceiptPayload::InviteAccepted(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            if p.member_id != ctx.author {
                return Err(HandlerError::NotAuthorized(
                    "invite_accepted must be authored by the invitee".into(),
                ));
            }
            match &ctx.target_member {
                Some(member) if member.status == JarMemberStatus::Pending => {
                    Ok(vec![ProjectionMutation::SetMemberStatus {
                        jar_id: jar.jar_id,
                        member_id: p.member_id.clone(),
                        status: JarMemberStatus::Active,
                        joined_at_ms: Some(p.accepted_at_ms),
                        removed_at_ms: None,
                    }])
                }
                Some(_) => Err(HandlerError::MissingTarget(format!(
                    "member {} has no pending invite",
                    p.member_id
                ))),
                None => Err(HandlerError::MissingTarget(format!(
                    "member {} is not invited",
                    p.member_id
                ))),
            }
        }

        ReceiptPayload::MemberRemoved(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            if jar.owner_member_id != ctx.author {
                return Err(HandlerError::NotAuthorized(
                    "member_removed must be authored by the owner".into(),
                ));
            }
            Ok(vec![ProjectionMutation::SetMemberStatus {
                jar_id: jar.jar_id,
                member_id: p.member_id.clone(),
                status: JarMemberStatus::Removed,
                joined_at_ms: None,
                removed_at_ms: Some(p.removed_at_ms),
            }])
        }

        ReceiptPayload::MemberLeft(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            if ctx.target_member.is_none() {
                return Err(HandlerError::MissingTarget(format!(
                    "member {} is not in the jar",
                    ctx.author
                )));
            }
            Ok(vec![ProjectionMutation::SetMemberStatus {
                jar_id: jar.jar_id,
                member_id: ctx.author.clone(),
                status: JarMemberStatus::Removed,
                joined_at_ms: None,
                removed_at_ms: Some(p.left_at_ms),
            }])
        }

        ReceiptPayload::Renamed(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            if jar.owner_member_id != ctx.author {
                return Err(HandlerError::NotAuthorized(
                    "renamed must be authored by the owner".into(),
                ));
            }
            Ok(vec![ProjectionMutation::RenameJar {
                jar_id: jar.jar_id,
                name: p.name.clone(),
            }])
        }

        ReceiptPayload::BudShared(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            Ok(vec![ProjectionMutation::LinkBud {
                bud_uuid: p.bud_uuid.clone(),
                jar_id: jar.jar_id,
                author_member_id: ctx.author.clone(),
                caption: p.caption.clone(),
                linked_at_ms: p.shared_at_ms,
            }])
        }

        ReceiptPayload::BudDeleted(p) => {
            jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            let item = ctx.content_item.as_ref().ok_or_else(|| {
                HandlerError::MissingTarget(format!("content item {}", p.bud_uuid))
            })?;
            if p.deleted_by_member_id != item.author_member_id {
                return Err(HandlerError::NotAuthorized(
                    "bud_deleted must name the item's original author".into(),
                ));
            }
            if p.deleted_by_member_id != ctx.author {
                return Err(HandlerError::NotAuthorized(
                    "bud_deleted must be authored by the deleting member".into(),
                ));
            }
            Ok(vec![ProjectionMutation::UnlinkBud {
                bud_uuid: p.bud_uuid.clone(),
            }])
        }

        ReceiptPayload::JarDeleted(p) => {
            let jar = jar.ok_or(HandlerError::JarMissing(ctx.jar_id))?;
            if jar.owner_member_id != ctx.author {
                return Err(HandlerError::NotAuthorized(
                    "jar.deleted must be authored by the owner".into(),
                ));
            }
            Ok(vec![
                ProjectionMutation::TombstoneJar {
                    jar_id: jar.jar_id,
                    deleted_by: ctx.author.clone(),
                    deleted_at_ms: p.deleted_at_ms,
                },
                ProjectionMutation::UnlinkAllBuds { jar_id: jar.jar_id },
                ProjectionMutation::DeleteJarRows { jar_id: jar.jar_id },
            ])
        }

        // The engine's policy decides on unknown types before dispatch.
        ReceiptPayload::Unknown { receipt_type, .. } => Err(HandlerError::InvalidPayload(
            format!("unknown receipt type: {}", receipt_type),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budsync_core::{
        AgreementPublicKey, BudDeletedPayload, BudSharedPayload, DeviceId, DeviceKeys,
        Ed25519PublicKey, InviteAcceptedPayload, JarCreatedPayload, MemberAddedPayload,
        RenamedPayload,
    };

    fn jar_id() -> JarId {
        JarId::from_bytes([0x11; 16])
    }

    fn owner() -> MemberId {
        MemberId::new("owner")
    }

    fn jar() -> JarRecord {
        JarRecord {
            jar_id: jar_id(),
            name: "Friends".to_string(),
            description: None,
            owner_member_id: owner(),
            created_at_ms: 1000,
            last_applied_sequence: 1,
            parent_cid: None,
        }
    }

    fn ctx(author: MemberId, seq: u64) -> HandlerContext {
        HandlerContext {
            author,
            jar_id: jar_id(),
            sequence_number: seq,
            received_at_ms: 2000,
            target_member: None,
            content_item: None,
        }
    }

    fn device_keys() -> DeviceKeys {
        DeviceKeys {
            device_id: DeviceId::from_bytes([0x2a; 16]),
            pk_sign: Ed25519PublicKey::from_bytes([0x01; 32]),
            pk_agree: AgreementPublicKey::from_bytes([0x02; 32]),
        }
    }

    #[test]
    fn test_jar_created_plans_jar_owner_and_pins() {
        let payload = ReceiptPayload::JarCreated(JarCreatedPayload {
            jar_id: jar_id(),
            name: "Friends".to_string(),
            description: None,
            owner_member_id: owner(),
            created_at_ms: 1000,
            owner_devices: vec![device_keys()],
        });

        let mutations = plan_mutations(None, &payload, &ctx(owner(), 1)).unwrap();
        assert_eq!(mutations.len(), 3);
        assert!(matches!(mutations[0], ProjectionMutation::InsertJar { .. }));
        assert!(matches!(
            mutations[1],
            ProjectionMutation::UpsertMember { .. }
        ));
        assert!(matches!(mutations[2], ProjectionMutation::PinDevice { .. }));
    }

    #[test]
    fn test_jar_created_requires_seq_one() {
        let payload = ReceiptPayload::JarCreated(JarCreatedPayload {
            jar_id: jar_id(),
            name: "Friends".to_string(),
            description: None,
            owner_member_id: owner(),
            created_at_ms: 1000,
            owner_devices: vec![device_keys()],
        });

        let result = plan_mutations(None, &payload, &ctx(owner(), 2));
        assert!(matches!(
            result,
            Err(HandlerError::WrongSequence { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_jar_created_existing_jar_is_noop() {
        let payload = ReceiptPayload::JarCreated(JarCreatedPayload {
            jar_id: jar_id(),
            name: "Friends".to_string(),
            description: None,
            owner_member_id: owner(),
            created_at_ms: 1000,
            owner_devices: vec![device_keys()],
        });

        let existing = jar();
        let mutations = plan_mutations(Some(&existing), &payload, &ctx(owner(), 1)).unwrap();
        assert!(mutations.is_empty());
    }

    #[test]
    fn test_member_added_requires_devices() {
        let payload = ReceiptPayload::MemberAdded(MemberAddedPayload {
            member_id: MemberId::new("m2"),
            display_name: None,
            devices: vec![],
            invited_at_ms: 2000,
        });

        let existing = jar();
        let result = plan_mutations(Some(&existing), &payload, &ctx(owner(), 2));
        assert!(matches!(result, Err(HandlerError::InvalidPayload(_))));
    }

    #[test]
    fn test_member_added_pins_then_upserts_pending() {
        let payload = ReceiptPayload::MemberAdded(MemberAddedPayload {
            member_id: MemberId::new("m2"),
            display_name: Some("Dee".to_string()),
            devices: vec![device_keys()],
            invited_at_ms: 2000,
        });

        let existing = jar();
        let mutations = plan_mutations(Some(&existing), &payload, &ctx(owner(), 2)).unwrap();
        assert!(matches!(mutations[0], ProjectionMutation::PinDevice { .. }));
        match &mutations[1] {
            ProjectionMutation::UpsertMember { member } => {
                assert_eq!(member.status, JarMemberStatus::Pending);
                assert_eq!(member.role, JarMemberRole::Member);
            }
            other => panic!("unexpected mutation: {:?}", other),
        }
    }

    #[test]
    fn test_invite_accepted_needs_pending_member() {
        let invitee = MemberId::new("m2");
        let payload = ReceiptPayload::InviteAccepted(InviteAcceptedPayload {
            member_id: invitee.clone(),
            accepted_at_ms: 3000,
        });

        let existing = jar();

        // No member row at all.
        let result = plan_mutations(Some(&existing), &payload, &ctx(invitee.clone(), 3));
        assert!(matches!(result, Err(HandlerError::MissingTarget(_))));

        // Pending member accepts.
        let mut context = ctx(invitee.clone(), 3);
        context.target_member = Some(JarMemberRecord {
            jar_id: jar_id(),
            member_id: invitee.clone(),
            role: JarMemberRole::Member,
            status: JarMemberStatus::Pending,
            display_name: None,
            joined_at_ms: None,
            invited_at_ms: Some(2000),
            removed_at_ms: None,
        });
        let mutations = plan_mutations(Some(&existing), &payload, &context).unwrap();
        assert!(matches!(
            mutations[0],
            ProjectionMutation::SetMemberStatus {
                status: JarMemberStatus::Active,
                ..
            }
        ));
    }

    #[test]
    fn test_renamed_requires_owner() {
        let payload = ReceiptPayload::Renamed(RenamedPayload {
            name: "New".to_string(),
        });

        let existing = jar();
        let result = plan_mutations(Some(&existing), &payload, &ctx(MemberId::new("m2"), 4));
        assert!(matches!(result, Err(HandlerError::NotAuthorized(_))));

        let mutations = plan_mutations(Some(&existing), &payload, &ctx(owner(), 4)).unwrap();
        assert!(matches!(mutations[0], ProjectionMutation::RenameJar { .. }));
    }

    #[test]
    fn test_bud_shared_requires_jar() {
        let payload = ReceiptPayload::BudShared(BudSharedPayload {
            bud_uuid: "B1".to_string(),
            caption: None,
            shared_at_ms: 5000,
        });

        let result = plan_mutations(None, &payload, &ctx(owner(), 3));
        assert!(matches!(result, Err(HandlerError::JarMissing(_))));
    }

    #[test]
    fn test_bud_deleted_enforces_item_author() {
        let author = MemberId::new("m2");
        let payload = ReceiptPayload::BudDeleted(BudDeletedPayload {
            bud_uuid: "B1".to_string(),
            deleted_by_member_id: author.clone(),
            deleted_at_ms: 6000,
        });

        let existing = jar();
        let mut context = ctx(author.clone(), 5);
        context.content_item = Some(ContentItemRecord {
            bud_uuid: "B1".to_string(),
            jar_id: Some(jar_id()),
            author_member_id: MemberId::new("someone-else"),
            caption: None,
            linked_at_ms: 5000,
        });

        let result = plan_mutations(Some(&existing), &payload, &context);
        assert!(matches!(result, Err(HandlerError::NotAuthorized(_))));

        // Matching author unlinks.
        if let Some(item) = context.content_item.as_mut() {
            item.author_member_id = author;
        }
        let mutations = plan_mutations(Some(&existing), &payload, &context).unwrap();
        assert!(matches!(mutations[0], ProjectionMutation::UnlinkBud { .. }));
    }

    #[test]
    fn test_jar_deleted_tombstones_and_clears() {
        let payload = ReceiptPayload::JarDeleted(budsync_core::JarDeletedPayload {
            deleted_at_ms: 9000,
            reason: None,
        });

        let existing = jar();
        let mutations = plan_mutations(Some(&existing), &payload, &ctx(owner(), 6)).unwrap();
        assert!(matches!(
            mutations[0],
            ProjectionMutation::TombstoneJar { .. }
        ));
        assert!(matches!(
            mutations[1],
            ProjectionMutation::UnlinkAllBuds { .. }
        ));
        assert!(matches!(
            mutations[2],
            ProjectionMutation::DeleteJarRows { .. }
        ));
    }
}
