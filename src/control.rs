//! C8 — PFCP control-plane dispatch. Owns per-peer association state and
//! translates Session Establishment/Modification/Deletion requests into
//! [`SessionStore`]/[`NatTable`] operations, mirroring the wire IEs onto our
//! own rule types rather than keeping the CP's representation around.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use rs_pfcp::ie::cause::CauseValue;
use rs_pfcp::ie::create_far::CreateFar;
use rs_pfcp::ie::create_pdr::CreatePdr;
use rs_pfcp::ie::create_qer::CreateQer;
use rs_pfcp::ie::create_urr::CreateUrr;
use rs_pfcp::ie::created_pdr::CreatedPdr;
use rs_pfcp::ie::destination_interface::Interface as WireDestInterface;
use rs_pfcp::ie::f_teid::FteidBuilder;
use rs_pfcp::ie::node_id::NodeId;
use rs_pfcp::ie::source_interface::SourceInterfaceValue;
use rs_pfcp::ie::{Ie, IeType};
use rs_pfcp::message::association_release_response::AssociationReleaseResponseBuilder;
use rs_pfcp::message::association_setup_response::AssociationSetupResponseBuilder;
use rs_pfcp::message::heartbeat_response::HeartbeatResponseBuilder;
use rs_pfcp::message::session_deletion_request::SessionDeletionRequest;
use rs_pfcp::message::session_deletion_response::SessionDeletionResponse;
use rs_pfcp::message::session_establishment_request::SessionEstablishmentRequest;
use rs_pfcp::message::session_establishment_response::SessionEstablishmentResponseBuilder;
use rs_pfcp::message::session_modification_request::SessionModificationRequest;
use rs_pfcp::message::session_modification_response::SessionModificationResponseBuilder;
use rs_pfcp::message::{Message, MsgType};

use crate::nat::NatTable;
use crate::rules::{DetectionRule, ForwardingAction, ForwardingRule, Interface, OuterHeader, QosRule, TokenBucket, UsageRule};
use crate::session::{Session, SessionStore};

/// Per-peer association state. A session request from a peer that never
/// completed Association Setup is still honored — resolved in DESIGN.md in
/// favor of availability over strict ordering.
#[derive(Default)]
struct AssociationTable {
    peers: Mutex<HashMap<SocketAddr, SystemTime>>,
}

impl AssociationTable {
    fn mark_established(&self, peer: SocketAddr) {
        self.peers.lock().unwrap().insert(peer, SystemTime::now());
    }

    fn clear_established(&self, peer: SocketAddr) {
        self.peers.lock().unwrap().remove(&peer);
    }

    fn is_established(&self, peer: SocketAddr) -> bool {
        self.peers.lock().unwrap().contains_key(&peer)
    }
}

pub struct ControlContext {
    pub store: Arc<SessionStore>,
    pub nat: Arc<NatTable>,
    pub external_ip: Ipv4Addr,
    associations: AssociationTable,
}

impl ControlContext {
    /// Takes the same `store`/`nat` handles the data plane forwards packets
    /// against, so a session created here is immediately visible to the
    /// uplink/downlink workers.
    pub fn new(store: Arc<SessionStore>, nat: Arc<NatTable>, external_ip: Ipv4Addr) -> Self {
        ControlContext {
            store,
            nat,
            external_ip,
            associations: AssociationTable::default(),
        }
    }
}

/// Handles one datagram received on the control socket, returning the bytes
/// to send back to `peer`, if any. Messages with no UPF-side reply (e.g. a
/// Session Report Response acking our own report) return `None`.
pub fn dispatch(ctx: &ControlContext, data: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
    let msg = match rs_pfcp::message::parse(data) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, %peer, "failed to parse PFCP message");
            return association_setup_mandatory_ie_reply(ctx, data);
        }
    };

    match msg.msg_type() {
        MsgType::HeartbeatRequest => Some(
            HeartbeatResponseBuilder::new(msg.sequence())
                .recovery_time_stamp(SystemTime::now())
                .build()
                .marshal(),
        ),
        MsgType::AssociationSetupRequest => {
            ctx.associations.mark_established(peer);
            Some(
                AssociationSetupResponseBuilder::new(msg.sequence())
                    .node_id_ie(NodeId::new_ipv4(ctx.external_ip).to_ie())
                    .cause(CauseValue::RequestAccepted)
                    .build()
                    .marshal(),
            )
        }
        MsgType::AssociationReleaseRequest => {
            ctx.associations.clear_established(peer);
            Some(
                AssociationReleaseResponseBuilder::new(msg.sequence())
                    .node_id(NodeId::new_ipv4(ctx.external_ip).to_ie())
                    .cause(CauseValue::RequestAccepted)
                    .marshal(),
            )
        }
        MsgType::SessionEstablishmentRequest => Some(handle_establishment(ctx, data, msg.sequence(), peer)),
        MsgType::SessionModificationRequest => Some(handle_modification(ctx, data, msg.sequence())),
        MsgType::SessionDeletionRequest => Some(handle_deletion(ctx, data, msg.sequence())),
        other => {
            tracing::debug!(?other, %peer, "unhandled PFCP message type");
            None
        }
    }
}

fn cause_ie(v: CauseValue) -> Ie {
    Ie::new(IeType::Cause, vec![v as u8])
}

/// `rs_pfcp::message::parse()` is all-or-nothing: a message missing a
/// mandatory IE fails inside its own type's `unmarshal()` before `dispatch`
/// ever sees a typed message to match on. The header alone (message type,
/// sequence number) still unmarshals independently, which is enough to
/// answer the one case spec.md calls out explicitly: a malformed
/// Association Setup Request gets `cause=mandatory-ie-missing` rather than
/// being silently dropped.
fn association_setup_mandatory_ie_reply(ctx: &ControlContext, data: &[u8]) -> Option<Vec<u8>> {
    let header = rs_pfcp::message::header::Header::unmarshal(data).ok()?;
    if header.message_type != MsgType::AssociationSetupRequest {
        return None;
    }
    Some(
        AssociationSetupResponseBuilder::new(header.sequence_number)
            .node_id_ie(NodeId::new_ipv4(ctx.external_ip).to_ie())
            .cause(CauseValue::MandatoryIeMissing)
            .build()
            .marshal(),
    )
}

fn wire_interface(v: SourceInterfaceValue) -> Interface {
    match v {
        SourceInterfaceValue::Access => Interface::Access,
        SourceInterfaceValue::Core => Interface::Core,
        _ => Interface::Peer,
    }
}

fn handle_establishment(ctx: &ControlContext, data: &[u8], seq: u32, peer: SocketAddr) -> Vec<u8> {
    let req = match SessionEstablishmentRequest::unmarshal(data) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "malformed SessionEstablishmentRequest");
            return SessionEstablishmentResponseBuilder::new(0, seq, CauseValue::MandatoryIeMissing)
                .node_id(NodeId::new_ipv4(ctx.external_ip).to_ie())
                .fseid(0u64, std::net::IpAddr::V4(ctx.external_ip))
                .build()
                .map(|m| m.marshal())
                .unwrap_or_default();
        }
    };

    let peer_seid = req.header.seid;

    if !ctx.associations.is_established(peer) {
        tracing::warn!(%peer, "session establishment request from peer with no PFCP association");
        return SessionEstablishmentResponseBuilder::new(peer_seid, seq, CauseValue::NoEstablishedPfcpassociation)
            .node_id(NodeId::new_ipv4(ctx.external_ip).to_ie())
            .fseid(0u64, std::net::IpAddr::V4(ctx.external_ip))
            .build()
            .map(|m| m.marshal())
            .unwrap_or_default();
    }

    let session = match ctx.store.create(peer_seid) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "session establishment rejected");
            return SessionEstablishmentResponseBuilder::new(peer_seid, seq, CauseValue::NoResourcesAvailable)
                .node_id(NodeId::new_ipv4(ctx.external_ip).to_ie())
                .fseid(0u64, std::net::IpAddr::V4(ctx.external_ip))
                .build()
                .map(|m| m.marshal())
                .unwrap_or_default();
        }
    };

    let mut far_by_id = HashMap::new();
    for ie in &req.create_fars {
        if let Ok(far) = CreateFar::unmarshal(&ie.payload) {
            far_by_id.insert(far.far_id.value as u16, far);
        }
    }
    let mut qer_by_id = HashMap::new();
    for ie in &req.create_qers {
        if let Ok(qer) = CreateQer::unmarshal(&ie.payload) {
            qer_by_id.insert(qer.qer_id.value as u16, qer);
        }
    }
    let mut urr_by_id = HashMap::new();
    for ie in &req.create_urrs {
        if let Ok(urr) = CreateUrr::unmarshal(&ie.payload) {
            urr_by_id.insert(urr.urr_id.id as u16, urr);
        }
    }

    let now = Instant::now();
    let mut created_pdrs = Vec::new();

    {
        let mut inner = session.lock();
        for (id, far) in &far_by_id {
            let _ = inner.upsert_forwarding(to_forwarding_rule(*id, far));
        }
        for (id, qer) in &qer_by_id {
            let _ = inner.upsert_qos(to_qos_rule(*id, qer, now));
        }
        for (id, urr) in &urr_by_id {
            let _ = inner.upsert_usage(to_usage_rule(*id, urr, now));
        }

        for pdr_ie in &req.create_pdrs {
            let received = match CreatePdr::unmarshal(&pdr_ie.payload) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse CreatePdr, skipping");
                    continue;
                }
            };

            let local_teid = received
                .pdi
                .f_teid
                .as_ref()
                .map(|f| f.teid)
                .filter(|t| *t != 0)
                .unwrap_or(session.local_id as u32);

            let detection = DetectionRule {
                id: received.pdr_id.value,
                precedence: received.precedence.value,
                source_interface: wire_interface(received.pdi.source_interface.value),
                tunnel_id: Some(local_teid),
                ue_ip: None,
                application_id: None,
                filter: None,
                forwarding_rule_id: received.far_id.map(|f| f.value as u16).unwrap_or(1),
                qos_rule_id: received.qer_id.map(|q| q.value as u16),
                usage_rule_id: received.urr_id.map(|u| u.id as u16),
            };
            if inner.upsert_detection(detection).is_err() {
                tracing::warn!("detection rule table full, skipping PDR {}", received.pdr_id.value);
                continue;
            }

            if matches!(received.pdi.source_interface.value, SourceInterfaceValue::Access) {
                if let Ok(local_fteid) = FteidBuilder::new().teid(local_teid).ipv4(ctx.external_ip).build() {
                    created_pdrs.push(CreatedPdr::new(received.pdr_id, local_fteid).to_ie());
                }
            }
        }

        // No parseable PDR survived: install a default pass-through pair so
        // the session is still usable rather than silently inert.
        if inner.detection.is_empty() {
            let local_teid = session.local_id as u32;
            let _ = inner.upsert_detection(DetectionRule {
                id: 1,
                precedence: 1,
                source_interface: Interface::Access,
                tunnel_id: Some(local_teid),
                ue_ip: None,
                application_id: None,
                filter: None,
                forwarding_rule_id: 1,
                qos_rule_id: None,
                usage_rule_id: None,
            });
            let _ = inner.upsert_forwarding(ForwardingRule {
                id: 1,
                action: ForwardingAction::Forward,
                destination_interface: Interface::Core,
                outer_header: None,
            });
            if let Ok(local_fteid) = FteidBuilder::new().teid(local_teid).ipv4(ctx.external_ip).build() {
                created_pdrs.push(CreatedPdr::new(rs_pfcp::ie::pdr_id::PdrId::new(1), local_fteid).to_ie());
            }
        }
    }

    let mut builder = SessionEstablishmentResponseBuilder::new(peer_seid, seq, CauseValue::RequestAccepted)
        .node_id(NodeId::new_ipv4(ctx.external_ip).to_ie())
        .fseid(session.local_id, std::net::IpAddr::V4(ctx.external_ip));
    for created in created_pdrs {
        builder = builder.created_pdr(created);
    }
    builder.build().map(|m| m.marshal()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to build SessionEstablishmentResponse");
        Vec::new()
    })
}

fn handle_modification(ctx: &ControlContext, data: &[u8], seq: u32) -> Vec<u8> {
    let req = match SessionModificationRequest::unmarshal(data) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "malformed SessionModificationRequest");
            return SessionModificationResponseBuilder::new(0, seq)
                .cause(CauseValue::MandatoryIeMissing)
                .build()
                .marshal();
        }
    };

    let peer_seid = req.header.seid;
    let session = match ctx.store.find_by_local(peer_seid) {
        Some(s) => s,
        None => {
            return SessionModificationResponseBuilder::new(peer_seid, seq)
                .cause(CauseValue::SessionContextNotFound)
                .build()
                .marshal();
        }
    };

    apply_modification(&session, &req);

    SessionModificationResponseBuilder::new(peer_seid, seq)
        .cause(CauseValue::RequestAccepted)
        .build()
        .marshal()
}

/// Only Create*/Remove* IE groups are honored; an "update" is expressed by
/// the CP as remove-then-recreate of the same rule id.
fn apply_modification(session: &Session, req: &SessionModificationRequest) {
    let now = Instant::now();
    let mut inner = session.lock();

    if let Some(ies) = &req.remove_pdrs {
        for ie in ies {
            if let Ok(id) = rs_pfcp::ie::pdr_id::PdrId::unmarshal(&ie.payload) {
                inner.remove_detection(id.value);
            }
        }
    }
    if let Some(ies) = &req.remove_fars {
        for ie in ies {
            if let Ok(id) = rs_pfcp::ie::far_id::FarId::unmarshal(&ie.payload) {
                inner.remove_forwarding(id.value as u16);
            }
        }
    }
    if let Some(ies) = &req.remove_qers {
        for ie in ies {
            if let Ok(id) = rs_pfcp::ie::qer_id::QerId::unmarshal(&ie.payload) {
                inner.remove_qos(id.value as u16);
            }
        }
    }
    if let Some(ies) = &req.remove_urrs {
        for ie in ies {
            if let Ok(id) = rs_pfcp::ie::urr_id::UrrId::unmarshal(&ie.payload) {
                inner.remove_usage(id.id as u16);
            }
        }
    }

    if let Some(ies) = &req.create_fars {
        for ie in ies {
            if let Ok(far) = CreateFar::unmarshal(&ie.payload) {
                let id = far.far_id.value as u16;
                let _ = inner.upsert_forwarding(to_forwarding_rule(id, &far));
            }
        }
    }
    if let Some(ies) = &req.create_qers {
        for ie in ies {
            if let Ok(qer) = CreateQer::unmarshal(&ie.payload) {
                let id = qer.qer_id.value as u16;
                let _ = inner.upsert_qos(to_qos_rule(id, &qer, now));
            }
        }
    }
    if let Some(ies) = &req.create_urrs {
        for ie in ies {
            if let Ok(urr) = CreateUrr::unmarshal(&ie.payload) {
                let id = urr.urr_id.id as u16;
                let _ = inner.upsert_usage(to_usage_rule(id, &urr, now));
            }
        }
    }
    if let Some(ies) = &req.create_pdrs {
        for ie in ies {
            if let Ok(pdr) = CreatePdr::unmarshal(&ie.payload) {
                let tunnel_id = pdr.pdi.f_teid.as_ref().map(|f| f.teid).filter(|t| *t != 0);
                let _ = inner.upsert_detection(DetectionRule {
                    id: pdr.pdr_id.value,
                    precedence: pdr.precedence.value,
                    source_interface: wire_interface(pdr.pdi.source_interface.value),
                    tunnel_id,
                    ue_ip: None,
                    application_id: None,
                    filter: None,
                    forwarding_rule_id: pdr.far_id.map(|f| f.value as u16).unwrap_or(1),
                    qos_rule_id: pdr.qer_id.map(|q| q.value as u16),
                    usage_rule_id: pdr.urr_id.map(|u| u.id as u16),
                });
            }
        }
    }
}

fn handle_deletion(ctx: &ControlContext, data: &[u8], seq: u32) -> Vec<u8> {
    let req = match SessionDeletionRequest::unmarshal(data) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "malformed SessionDeletionRequest");
            return SessionDeletionResponse::new(0, seq, cause_ie(CauseValue::MandatoryIeMissing), None, vec![]).marshal();
        }
    };

    let peer_seid = req.header.seid;
    let cause = if let Some(session) = ctx.store.find_by_local(peer_seid) {
        ctx.nat.delete_by_session(session.local_id);
        ctx.store.delete(peer_seid);
        CauseValue::RequestAccepted
    } else {
        CauseValue::SessionContextNotFound
    };

    SessionDeletionResponse::new(peer_seid, seq, cause_ie(cause), None, vec![]).marshal()
}

fn to_forwarding_rule(id: u16, far: &CreateFar) -> ForwardingRule {
    let action = if far.apply_action.contains(rs_pfcp::ie::apply_action::ApplyAction::DROP) {
        ForwardingAction::Drop
    } else if far.apply_action.contains(rs_pfcp::ie::apply_action::ApplyAction::BUFF) {
        ForwardingAction::Buffer
    } else {
        ForwardingAction::Forward
    };

    let destination_interface = far
        .forwarding_parameters
        .as_ref()
        .map(|p| match p.destination_interface.interface {
            WireDestInterface::Access => Interface::Access,
            WireDestInterface::Core => Interface::Core,
            _ => Interface::Peer,
        })
        .unwrap_or(Interface::Core);

    let outer_header = far.forwarding_parameters.as_ref().and_then(|p| {
        let ohc = p.outer_header_creation.as_ref()?;
        let teid = ohc.teid?;
        let dest_ip = ohc.ipv4_address?;
        Some(OuterHeader { teid, dest_ip })
    });

    ForwardingRule {
        id,
        action,
        destination_interface,
        outer_header,
    }
}

/// PPS has no wire IE in this corpus (3GPP leaves it to local policy); a
/// generous fixed ceiling keeps the constraint present without the MBR
/// figure (the wire value) being silently overridden.
const DEFAULT_PPS_LIMIT: f64 = 10_000.0;

fn to_qos_rule(id: u16, qer: &CreateQer, now: Instant) -> QosRule {
    let mut rule = QosRule::new(id, 0);
    rule.pps_uplink = Some(TokenBucket::new(DEFAULT_PPS_LIMIT, now));
    rule.pps_downlink = Some(TokenBucket::new(DEFAULT_PPS_LIMIT, now));
    if let Some(mbr) = qer.mbr {
        rule.mbr_uplink = Some(TokenBucket::new(mbr.uplink as f64, now));
        rule.mbr_downlink = Some(TokenBucket::new(mbr.downlink as f64, now));
    }
    rule
}

fn to_usage_rule(id: u16, urr: &CreateUrr, now: Instant) -> UsageRule {
    let mut rule = UsageRule::new(id, now);
    rule.measure_volume = urr.measurement_method.volume;
    rule.measure_duration = urr.measurement_method.duration;
    rule.volume_threshold = urr.volume_threshold.and_then(|v| v.total_volume);
    rule.time_threshold = urr.time_threshold.map(|t| Duration::from_secs(t.value as u64));
    // CreateUrr carries no quota fields in this IE set; quotas stay unset
    // until a future Update URR introduces them (resolved in DESIGN.md).
    rule
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_ctx() -> ControlContext {
        ControlContext::new(
            Arc::new(SessionStore::new(8)),
            Arc::new(NatTable::new(16, Ipv4Addr::new(10, 45, 0, 1), 10_000, 10_100, Duration::from_secs(60))),
            Ipv4Addr::new(10, 45, 0, 1),
        )
    }

    #[test]
    fn heartbeat_request_gets_a_response() {
        let ctx = make_ctx();
        let ts = rs_pfcp::ie::recovery_time_stamp::RecoveryTimeStamp::new(SystemTime::now());
        let ts_ie = Ie::new(IeType::RecoveryTimeStamp, ts.marshal().to_vec());
        let req = rs_pfcp::message::heartbeat_request::HeartbeatRequest::new(42, ts_ie, None, vec![]);
        let reply = dispatch(&ctx, &req.marshal(), "127.0.0.1:8805".parse().unwrap());
        assert!(reply.is_some());
        let parsed = rs_pfcp::message::parse(&reply.unwrap()).unwrap();
        assert_eq!(parsed.msg_type(), MsgType::HeartbeatResponse);
    }

    #[test]
    fn association_setup_marks_peer_established() {
        let ctx = make_ctx();
        let req = rs_pfcp::message::association_setup_request::AssociationSetupRequestBuilder::new(7)
            .node_id_ie(NodeId::new_ipv4(Ipv4Addr::new(192, 168, 0, 1)).to_ie())
            .recovery_time_stamp(SystemTime::now())
            .build();
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let reply = dispatch(&ctx, &req.marshal(), peer);
        assert!(reply.is_some());
        assert!(ctx.associations.peers.lock().unwrap().contains_key(&peer));
    }

    #[test]
    fn deletion_of_unknown_session_reports_context_not_found() {
        let ctx = make_ctx();
        let req = rs_pfcp::message::session_deletion_request::SessionDeletionRequestBuilder::new(999, 1).build();
        let bytes = handle_deletion(&ctx, &req.marshal(), 1);
        let parsed = rs_pfcp::message::parse(&bytes).unwrap();
        assert_eq!(parsed.msg_type(), MsgType::SessionDeletionResponse);
        assert_eq!(parsed.seid(), Some(999));
    }

    #[test]
    fn establishment_without_any_parseable_pdr_installs_default_rule() {
        let ctx = make_ctx();
        let peer: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        ctx.associations.mark_established(peer);
        // A non-empty but unparseable CreatePdr/CreateFar IE exercises the
        // "no detection rule survived" fallback without violating the
        // builder's own "at least one Create PDR/FAR" validation.
        let garbage_pdr = Ie::new(IeType::CreatePdr, vec![0u8; 1]);
        let garbage_far = Ie::new(IeType::CreateFar, vec![0u8; 1]);
        let req = rs_pfcp::message::session_establishment_request::SessionEstablishmentRequestBuilder::new(1, 1)
            .node_id(Ipv4Addr::new(10, 45, 0, 1))
            .fseid(1u64, Ipv4Addr::new(192, 168, 0, 2))
            .create_pdrs(vec![garbage_pdr])
            .create_fars(vec![garbage_far])
            .build()
            .unwrap();
        let bytes = handle_establishment(&ctx, &req.marshal(), 1, peer);
        let parsed = rs_pfcp::message::parse(&bytes).unwrap();
        assert_eq!(parsed.msg_type(), MsgType::SessionEstablishmentResponse);
        assert_eq!(ctx.store.live_count(), 1);
    }

    #[test]
    fn establishment_without_association_is_rejected() {
        let ctx = make_ctx();
        let peer: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let garbage_pdr = Ie::new(IeType::CreatePdr, vec![0u8; 1]);
        let garbage_far = Ie::new(IeType::CreateFar, vec![0u8; 1]);
        let req = rs_pfcp::message::session_establishment_request::SessionEstablishmentRequestBuilder::new(1, 1)
            .node_id(Ipv4Addr::new(10, 45, 0, 1))
            .fseid(1u64, Ipv4Addr::new(192, 168, 0, 2))
            .create_pdrs(vec![garbage_pdr])
            .create_fars(vec![garbage_far])
            .build()
            .unwrap();
        let bytes = handle_establishment(&ctx, &req.marshal(), 1, peer);
        let parsed = rs_pfcp::message::parse(&bytes).unwrap();
        assert_eq!(parsed.msg_type(), MsgType::SessionEstablishmentResponse);
        assert_eq!(ctx.store.live_count(), 0);
    }

    #[test]
    fn association_release_clears_peer_and_replies_accepted() {
        let ctx = make_ctx();
        let peer: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        ctx.associations.mark_established(peer);
        let req = rs_pfcp::message::association_release_request::AssociationReleaseRequestBuilder::new(3)
            .node_id(NodeId::new_ipv4(Ipv4Addr::new(10, 45, 0, 1)).to_ie())
            .build();
        let reply = dispatch(&ctx, &req.marshal(), peer).unwrap();
        let parsed = rs_pfcp::message::parse(&reply).unwrap();
        assert_eq!(parsed.msg_type(), MsgType::AssociationReleaseResponse);
        assert!(!ctx.associations.is_established(peer));
    }
}
