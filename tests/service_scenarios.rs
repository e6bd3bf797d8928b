extern crate failure;
extern crate parking_lot;
extern crate rust_ofp_ctl;
extern crate tokio;

mod common;

use std::sync::Arc;

use rust_ofp_ctl::message::{
    FlowRemoved, Match, Message, MultipartReplyBody, MultipartRequest, MultipartType, PacketIn, PacketOut, Port,
    PortReason, PortStatus, SwitchConfig, OFPP_CONTROLLER,
};
use rust_ofp_ctl::openflow::MsgCode;
use rust_ofp_ctl::role::Role;
use rust_ofp_ctl::testing::{CompliantBehavior, EventRecorder, MockSwitch, Switch, SwitchProfile};
use rust_ofp_ctl::{
    Controller, ControllerError, ControllerService, DatapathEventKind, DatapathId, FutureState, Interest,
    OutboundMessage, Outcome,
};

use common::*;

/// Connect a mastered 1.3 switch and drive it to Ready.
async fn ready_switch(
    controller: &Controller,
    recorder: &EventRecorder,
    profile: SwitchProfile,
    behavior: CompliantBehavior,
) -> MockSwitch<CompliantBehavior> {
    let dpid = profile.dpid;
    let mut switch = MockSwitch::connect(controller, profile, behavior).unwrap();
    switch.activate().await.unwrap();
    assert!(switch.pump_until_count(MsgCode::BarrierReq, 1, TIMEOUT).await.unwrap());
    assert!(recorder.wait_for(dpid, DatapathEventKind::Ready, TIMEOUT).await);
    switch
}

fn packet_in() -> Message {
    Message::PacketIn(PacketIn {
        buffer_id: None,
        total_len: 4,
        in_port: 1,
        reason: 0,
        table_id: 0,
        cookie: 0,
        pkt_match: Match::All,
        data: vec![0xde, 0xad, 0xbe, 0xef],
    })
}

fn flow_removed() -> Message {
    Message::FlowRemoved(FlowRemoved {
        cookie: 7,
        priority: 10,
        reason: 0,
        table_id: 0,
        duration_sec: 1,
        duration_nsec: 0,
        idle_timeout: 0,
        hard_timeout: 0,
        packet_count: 0,
        byte_count: 0,
        flow_match: Match::All,
    })
}

fn is_packet_in(msg: &Message) -> bool {
    msg.msg_code() == MsgCode::PacketIn
}

fn is_flow_removed(msg: &Message) -> bool {
    msg.msg_code() == MsgCode::FlowRemoved
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slave_writes_are_refused_before_any_io() {
    let (controller, recorder) = controller_with(config(), Arc::new(NeverMaster));
    let dpid = DatapathId(0x50);

    let mut switch = connect(&controller, 0x50, 4);
    switch.activate().await.unwrap();
    assert!(switch.pump_until_count(MsgCode::MultipartReq, 3, TIMEOUT).await.unwrap());
    assert!(recorder.wait_for(dpid, DatapathEventKind::Ready, TIMEOUT).await);
    assert_eq!(controller.role_of(dpid), Role::Slave);
    // no purge and no initial flows without mastership
    assert_eq!(switch.count_of(MsgCode::FlowMod), 0);
    let before = switch.received().len();

    let refused = vec![
        controller.send_batch_future(dpid, vec![Message::FlowMod(flow(1))]).err(),
        controller
            .send_future_with_barrier(dpid, Message::FlowMod(flow(1)).into(), Message::BarrierRequest.into())
            .err(),
        controller.send(dpid, Message::SetConfig(SwitchConfig::default())).err(),
        controller
            .send(
                dpid,
                Message::PacketOut(PacketOut {
                    buffer_id: None,
                    in_port: OFPP_CONTROLLER,
                    actions: vec![],
                    data: vec![1, 2, 3],
                }),
            )
            .err(),
        controller.enable_port(dpid, 1, false).err(),
    ];
    for (i, err) in refused.into_iter().enumerate() {
        match err {
            Some(ref e) if e.is_invalid_argument() => (),
            other => assert!(false, "write {} was not refused: {:?}", i, other),
        }
    }

    controller.send(dpid, Message::BarrierRequest).unwrap();
    assert!(switch.pump_until_count(MsgCode::BarrierReq, 1, TIMEOUT).await.unwrap());
    assert_eq!(switch.received().len(), before + 1);
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_misdirected_sends_are_refused() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x51);
    let _switch = ready_switch(&controller, &recorder, SwitchProfile::new(0x51, 4), CompliantBehavior::default()).await;

    assert!(controller.send(dpid, packet_in()).unwrap_err().is_invalid_argument());
    assert!(controller
        .send(dpid, Message::FlowMod(flow(1)))
        .unwrap_err()
        .is_invalid_argument());
    assert!(controller
        .send_future(dpid, Message::FlowMod(flow(1)).into())
        .unwrap_err()
        .is_invalid_argument());
    match controller.send(DatapathId(0x99), Message::BarrierRequest) {
        Err(ControllerError::NotFound { dpid }) => assert_eq!(dpid, DatapathId(0x99)),
        other => assert!(false, "unexpected result {:?}", other),
    }
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_packet_in_goes_to_the_sequencer_only() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x52);
    let sequencer = Arc::new(Collector::default());
    controller.register_sequencer(sequencer.clone()).unwrap();
    match controller.register_sequencer(Arc::new(Collector::default())) {
        Err(ControllerError::SequencerAlreadyRegistered) => (),
        other => assert!(false, "unexpected result {:?}", other),
    }
    let listener = Arc::new(Collector::default());
    controller.add_message_listener(listener.clone(), Interest::All, 0).unwrap();
    assert!(controller
        .add_message_listener(Arc::new(Collector::default()), Interest::of(&[MsgCode::PacketIn]), 0)
        .unwrap_err()
        .is_invalid_argument());

    let mut switch = ready_switch(&controller, &recorder, SwitchProfile::new(0x52, 4), CompliantBehavior::default()).await;
    switch.notify(packet_in()).await.unwrap();
    switch.notify(flow_removed()).await.unwrap();

    assert!(sequencer.wait_where(is_packet_in, TIMEOUT).await);
    assert!(listener.wait_where(is_flow_removed, TIMEOUT).await);
    assert_eq!(listener.count_where(is_packet_in), 0);
    assert_eq!(sequencer.count_where(is_flow_removed), 0);
    // correlated replies stay with their futures
    assert_eq!(listener.count_where(|m| m.msg_code() == MsgCode::BarrierResp), 0);

    let stats = controller.stats();
    assert_eq!(stats.packet_in_count, 1);
    assert_eq!(stats.packet_in_bytes, 4);
    assert_eq!(controller.datapath_info(dpid).unwrap().dpid, dpid);
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_packet_in_sharing_an_xid_with_a_request_still_reaches_the_sequencer() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x56);
    let sequencer = Arc::new(Collector::default());
    controller.register_sequencer(sequencer.clone()).unwrap();
    let mut switch = ready_switch(&controller, &recorder, SwitchProfile::new(0x56, 4), CompliantBehavior::default()).await;

    let request = Message::MultipartRequest(MultipartRequest::new(MultipartType::Desc));
    let future = controller.send_future(dpid, OutboundMessage::with_xid(0x88, request)).unwrap();
    switch.send(0x88, packet_in()).await.unwrap();

    assert!(sequencer.wait_where(is_packet_in, TIMEOUT).await);
    assert!(!future.is_done());

    assert!(switch.pump_until_count(MsgCode::MultipartReq, 4, TIMEOUT).await.unwrap());
    match tokio::time::timeout(TIMEOUT, future.wait()).await.unwrap() {
        Outcome::Success(reply) => assert_eq!(reply.msg_code(), MsgCode::MultipartResp),
        other => assert!(false, "unexpected outcome {:?}", other),
    }
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_multipart_future_merges_fragments() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x53);
    let listener = Arc::new(Collector::default());
    controller.add_message_listener(listener.clone(), Interest::All, 0).unwrap();
    let mut profile = SwitchProfile::new(0x53, 4);
    profile.ports = (1..=4).map(|n| Port::new(n, &format!("eth{}", n))).collect();
    let behavior = CompliantBehavior {
        port_desc_fragments: 2,
        ..CompliantBehavior::default()
    };
    let mut switch = ready_switch(&controller, &recorder, profile, behavior).await;

    let request = Message::MultipartRequest(MultipartRequest::new(MultipartType::PortDesc));
    let future = controller.send_future(dpid, request.into()).unwrap();
    assert!(switch.pump_until_count(MsgCode::MultipartReq, 4, TIMEOUT).await.unwrap());

    match tokio::time::timeout(TIMEOUT, future.wait()).await.unwrap() {
        Outcome::Success(Message::MultipartReply(reply)) => match reply.body {
            MultipartReplyBody::PortDesc(ports) => assert_eq!(ports.len(), 4),
            other => assert!(false, "unexpected body {:?}", other),
        },
        other => assert!(false, "unexpected outcome {:?}", other),
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(listener.count_where(|m| m.msg_code() == MsgCode::MultipartResp), 0);
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_xid_resolves_as_exception() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x54);
    let mut switch = ready_switch(&controller, &recorder, SwitchProfile::new(0x54, 4), CompliantBehavior::default()).await;

    let desc = || Message::MultipartRequest(MultipartRequest::new(MultipartType::Desc));
    let first = controller.send_future(dpid, OutboundMessage::with_xid(0x77, desc())).unwrap();
    let second = controller.send_future(dpid, OutboundMessage::with_xid(0x77, desc())).unwrap();
    assert_eq!(second.state(), FutureState::Exception);
    assert!(!first.is_done());

    assert!(switch.pump_until_count(MsgCode::MultipartReq, 4, TIMEOUT).await.unwrap());
    let outcome = tokio::time::timeout(TIMEOUT, first.wait()).await.unwrap();
    assert_eq!(outcome.state(), FutureState::Success);
    // only the first request reached the wire
    assert_eq!(switch.count_of(MsgCode::MultipartReq), 4);
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_port_status_updates_cache_and_enable_port() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x55);
    let mut switch = ready_switch(&controller, &recorder, SwitchProfile::new(0x55, 4), CompliantBehavior::default()).await;

    switch
        .notify(Message::PortStatus(PortStatus {
            reason: PortReason::Add,
            desc: Port::new(3, "eth3"),
        }))
        .await
        .unwrap();
    assert!(recorder.wait_for(dpid, DatapathEventKind::PortAdded, TIMEOUT).await);
    let added = recorder
        .events()
        .into_iter()
        .find(|e| e.kind == DatapathEventKind::PortAdded)
        .and_then(|e| e.port);
    assert_eq!(added.map(|p| p.port_no), Some(3));
    assert_eq!(controller.datapath_info(dpid).unwrap().ports.len(), 3);

    let future = controller.enable_port(dpid, 3, false).unwrap();
    assert!(switch.pump_until_count(MsgCode::BarrierReq, 2, TIMEOUT).await.unwrap());
    let outcome = tokio::time::timeout(TIMEOUT, future.wait()).await.unwrap();
    assert_eq!(outcome.state(), FutureState::SuccessNoReply);
    let port_mod = switch.received().iter().find_map(|(_, m)| match m {
        Message::PortMod(pm) => Some(pm.clone()),
        _ => None,
    });
    assert_eq!(port_mod.map(|pm| pm.port_no), Some(3));

    match controller.enable_port(dpid, 99, true) {
        Err(ControllerError::PortNotFound { port, .. }) => assert_eq!(port, 99),
        other => assert!(false, "unexpected result {:?}", other),
    }

    switch
        .notify(Message::PortStatus(PortStatus {
            reason: PortReason::Delete,
            desc: Port::new(3, "eth3"),
        }))
        .await
        .unwrap();
    assert!(recorder.wait_for(dpid, DatapathEventKind::PortRemoved, TIMEOUT).await);
    assert_eq!(controller.datapath_info(dpid).unwrap().ports.len(), 2);
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auxiliary_connection_attaches_and_falls_back() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x60);
    let mut main = ready_switch(&controller, &recorder, SwitchProfile::new(0x60, 4), CompliantBehavior::default()).await;

    let aux_profile = SwitchProfile::new(0x60, 4).with_auxiliary_id(1);
    let mut aux = MockSwitch::connect(&controller, aux_profile, CompliantBehavior::default()).unwrap();
    aux.activate().await.unwrap();
    assert!(aux.pump_until_count(MsgCode::FeaturesReq, 1, TIMEOUT).await.unwrap());
    let attached = || controller.datapath_info(dpid).map(|i| i.auxiliary_ids == vec![1]).unwrap_or(false);
    assert!(eventually(attached, TIMEOUT).await);

    controller.send_aux(dpid, 1, Message::EchoRequest(vec![1])).unwrap();
    assert!(aux.pump_until_count(MsgCode::EchoReq, 1, TIMEOUT).await.unwrap());
    controller.send_aux(dpid, 2, Message::EchoRequest(vec![2])).unwrap();
    assert!(main.pump_until_count(MsgCode::EchoReq, 1, TIMEOUT).await.unwrap());

    aux.deactivate().await;
    let detached = || controller.datapath_info(dpid).map(|i| i.auxiliary_ids.is_empty()).unwrap_or(false);
    assert!(eventually(detached, TIMEOUT).await);
    controller.send_aux(dpid, 1, Message::EchoRequest(vec![3])).unwrap();
    assert!(main.pump_until_count(MsgCode::EchoReq, 2, TIMEOUT).await.unwrap());
    assert_eq!(recorder.count(dpid, DatapathEventKind::Disconnected), 0);

    // an auxiliary connection without a main one is closed
    let orphan = SwitchProfile::new(0x61, 4).with_auxiliary_id(1);
    let mut orphan = MockSwitch::connect(&controller, orphan, CompliantBehavior::default()).unwrap();
    orphan.activate().await.unwrap();
    assert!(orphan.wait_closed(TIMEOUT).await.unwrap());
    assert_eq!(datapath_count(&controller), 1);
    assert!(recorder.kinds_for(DatapathId(0x61)).is_empty());
    controller.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_fails_pending_requests() {
    let (controller, recorder) = controller();
    let dpid = DatapathId(0x70);
    let mut switch = ready_switch(&controller, &recorder, SwitchProfile::new(0x70, 4), CompliantBehavior::default()).await;

    let request = Message::MultipartRequest(MultipartRequest::new(MultipartType::Desc));
    let future = controller.send_future(dpid, request.into()).unwrap();
    switch.deactivate().await;

    assert!(recorder.wait_for(dpid, DatapathEventKind::Disconnected, TIMEOUT).await);
    let outcome = tokio::time::timeout(TIMEOUT, future.wait()).await.unwrap();
    assert_eq!(outcome.state(), FutureState::Exception);
    assert!(controller.datapath_info(dpid).is_err());
    assert_eq!(
        recorder.kinds_for(dpid),
        vec![DatapathEventKind::Connected, DatapathEventKind::Ready, DatapathEventKind::Disconnected]
    );
    controller.shutdown();
}
