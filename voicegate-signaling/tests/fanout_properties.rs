//! End-to-end properties of the signaling engine: idempotent
//! subscription, no fabricated identifiers, stream-room gating,
//! join-time reconciliation, the readiness gate, and stop-before-start
//! ordering.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use voicegate_signaling::{
    ConsumerAllocation, MediaEngine, MediaKind, Participant, ProducerState, RoomId, RoomRegistry,
    RoomType, SignalingConfig, StreamEntry, TrackInfo, TrackUpdate, UpdateFanout, UpdateSink,
    UserId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineCall {
    Publish(UserId, MediaKind, u32),
    Stop(UserId, MediaKind),
    CreateConsumer(UserId, UserId, MediaKind),
    Keyframe(UserId, UserId),
}

/// Deterministic engine that records every call it receives
struct RecordingEngine {
    next_ssrc: AtomicU32,
    calls: Mutex<Vec<EngineCall>>,
}

impl RecordingEngine {
    fn new() -> Self {
        Self {
            next_ssrc: AtomicU32::new(5000),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn publish_track(
        &self,
        _room: &RoomId,
        producer: &UserId,
        kind: MediaKind,
        info: TrackInfo,
    ) -> voicegate_signaling::Result<()> {
        self.record(EngineCall::Publish(producer.clone(), kind, info.ssrc));
        Ok(())
    }

    async fn stop_track(
        &self,
        _room: &RoomId,
        producer: &UserId,
        kind: MediaKind,
    ) -> voicegate_signaling::Result<()> {
        self.record(EngineCall::Stop(producer.clone(), kind));
        Ok(())
    }

    async fn create_consumer(
        &self,
        _room: &RoomId,
        viewer: &UserId,
        producer: &UserId,
        kind: MediaKind,
    ) -> voicegate_signaling::Result<ConsumerAllocation> {
        self.record(EngineCall::CreateConsumer(
            viewer.clone(),
            producer.clone(),
            kind,
        ));
        let ssrc = self.next_ssrc.fetch_add(1, Ordering::Relaxed);
        Ok(match kind {
            MediaKind::Audio => ConsumerAllocation {
                ssrc,
                rtx_ssrc: 0,
                payload_type: 111,
                rtx_payload_type: 0,
            },
            MediaKind::Video => ConsumerAllocation {
                ssrc,
                rtx_ssrc: self.next_ssrc.fetch_add(1, Ordering::Relaxed),
                payload_type: 102,
                rtx_payload_type: 103,
            },
        })
    }

    async fn request_keyframe(
        &self,
        _room: &RoomId,
        producer: &UserId,
        viewer: &UserId,
    ) -> voicegate_signaling::Result<bool> {
        self.record(EngineCall::Keyframe(producer.clone(), viewer.clone()));
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SinkEvent {
    Update(TrackUpdate),
    MediaSinkWants(u32),
    Disconnect(UserId),
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl UpdateSink for ChannelSink {
    fn send_update(&self, update: TrackUpdate) -> anyhow::Result<()> {
        self.tx.send(SinkEvent::Update(update))?;
        Ok(())
    }

    fn send_media_sink_wants(&self, any: u32) -> anyhow::Result<()> {
        self.tx.send(SinkEvent::MediaSinkWants(any))?;
        Ok(())
    }

    fn send_client_disconnect(&self, user_id: &UserId) -> anyhow::Result<()> {
        self.tx.send(SinkEvent::Disconnect(user_id.clone()))?;
        Ok(())
    }
}

struct Rig {
    engine: Arc<RecordingEngine>,
    fanout: UpdateFanout,
}

impl Rig {
    fn new() -> Self {
        let engine = Arc::new(RecordingEngine::new());
        let registry = Arc::new(RoomRegistry::new(SignalingConfig::default()));
        let fanout = UpdateFanout::new(
            Arc::clone(&registry),
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            SignalingConfig::default(),
        );
        Self { engine, fanout }
    }

    /// Join a participant and hand back its handle and outbound mailbox
    async fn join(
        &self,
        room: &str,
        user: &str,
        room_type: RoomType,
        stream_owner: Option<&str>,
    ) -> (Arc<Participant>, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let participant = Arc::new(Participant::new(
            UserId::from(user),
            RoomId::from(room),
            room_type,
            Arc::new(ChannelSink { tx }),
        ));
        self.fanout
            .registry()
            .join(
                &RoomId::from(room),
                room_type,
                stream_owner.map(UserId::from),
                Arc::clone(&participant),
            )
            .await
            .expect("join");
        (participant, rx)
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> Vec<SinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn updates(events: &[SinkEvent]) -> Vec<&TrackUpdate> {
    events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Update(u) => Some(u),
            _ => None,
        })
        .collect()
}

fn audio_state(ssrc: u32) -> ProducerState {
    ProducerState {
        audio_ssrc: ssrc,
        ..ProducerState::default()
    }
}

fn video_state(audio_ssrc: u32, video_ssrc: u32, rtx_ssrc: u32) -> ProducerState {
    ProducerState {
        audio_ssrc,
        video_ssrc,
        rtx_ssrc,
        streams: vec![StreamEntry::fallback(video_ssrc, rtx_ssrc, true)],
    }
}

#[tokio::test]
async fn call_room_audio_producer_reaches_late_joiner_exactly_once() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, _p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    p1.mark_transport_ready();
    rig.fanout
        .handle_producer_state(&room, &p1.user_id, audio_state(111))
        .await
        .expect("producer state");

    let (v1, mut v1_rx) = rig.join("r", "v1", RoomType::Call, None).await;
    rig.fanout
        .handle_transport_ready(&room, &v1.user_id)
        .await
        .expect("reconcile");

    let events = drain(&mut v1_rx);
    let got = updates(&events);
    assert_eq!(got.len(), 1, "exactly one update to the late joiner");
    let update = got[0];
    assert_eq!(update.user_id, UserId::from("p1"));
    assert_ne!(update.audio_ssrc, 0, "engine-assigned consumer id");
    assert_ne!(update.audio_ssrc, 111, "not the producer-side ssrc");
    assert_eq!(update.video_ssrc, 0);
    assert_eq!(update.audio_pt, 111);
}

#[tokio::test]
async fn resent_producer_state_is_idempotent() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, _p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    let (_v1, mut v1_rx) = rig.join("r", "v1", RoomType::Call, None).await;
    p1.mark_transport_ready();

    rig.fanout
        .handle_producer_state(&room, &p1.user_id, audio_state(111))
        .await
        .expect("first state");
    let first = updates(&drain(&mut v1_rx))
        .first()
        .cloned()
        .cloned()
        .expect("first update");

    // Same declaration again: resend required, identifiers identical,
    // exactly one consumer ever created
    rig.fanout
        .handle_producer_state(&room, &p1.user_id, audio_state(111))
        .await
        .expect("second state");
    let events = drain(&mut v1_rx);
    let second = updates(&events);
    assert_eq!(second.len(), 1, "already-subscribed peer still updated");
    assert_eq!(second[0].audio_ssrc, first.audio_ssrc);

    let consumer_calls = rig
        .engine
        .calls()
        .into_iter()
        .filter(|c| matches!(c, EngineCall::CreateConsumer(..)))
        .count();
    assert_eq!(consumer_calls, 1);
}

#[tokio::test]
async fn stream_room_suppresses_updates_without_video_ssrc() {
    let rig = Rig::new();
    let room = RoomId::from("s");

    let (owner, _owner_rx) = rig.join("s", "owner", RoomType::Stream, Some("owner")).await;
    let (_viewer, mut viewer_rx) = rig.join("s", "viewer", RoomType::Stream, Some("owner")).await;
    owner.mark_transport_ready();

    // Audio-only publication in a stream room: viewer must not get an
    // update that would leave its stream render black
    rig.fanout
        .handle_producer_state(&room, &owner.user_id, audio_state(111))
        .await
        .expect("audio state");
    assert!(updates(&drain(&mut viewer_rx)).is_empty());

    // Once video is up the update flows, video_ssrc resolved
    rig.fanout
        .handle_producer_state(&room, &owner.user_id, video_state(111, 222, 223))
        .await
        .expect("video state");
    let events = drain(&mut viewer_rx);
    let got = updates(&events);
    assert_eq!(got.len(), 1);
    assert_ne!(got[0].video_ssrc, 0);
    assert_eq!(got[0].streams.len(), 1);
    assert_eq!(got[0].streams[0].kind, "video");
    assert!(got[0].streams[0].active);
}

#[tokio::test]
async fn stream_room_ignores_video_intent_from_non_owner() {
    let rig = Rig::new();
    let room = RoomId::from("s");

    let (_owner, _owner_rx) = rig.join("s", "owner", RoomType::Stream, Some("owner")).await;
    let (p2, _p2_rx) = rig.join("s", "p2", RoomType::Stream, Some("owner")).await;
    let (_v, mut v_rx) = rig.join("s", "v", RoomType::Stream, Some("owner")).await;
    p2.mark_transport_ready();

    rig.fanout
        .handle_producer_state(&room, &p2.user_id, video_state(0, 500, 501))
        .await
        .expect("non-owner video state");

    assert!(!p2.is_producing(MediaKind::Video), "no video TrackInfo for non-owner");
    assert!(updates(&drain(&mut v_rx)).is_empty());
}

#[tokio::test]
async fn join_reconciliation_subscribes_to_every_active_kind_once() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, _p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    let (p2, _p2_rx) = rig.join("r", "p2", RoomType::Call, None).await;
    p1.mark_transport_ready();
    p2.mark_transport_ready();

    rig.fanout
        .handle_producer_state(&room, &p1.user_id, video_state(111, 222, 223))
        .await
        .expect("p1 state");
    rig.fanout
        .handle_producer_state(&room, &p2.user_id, audio_state(333))
        .await
        .expect("p2 state");

    let (v, mut v_rx) = rig.join("r", "v", RoomType::Call, None).await;
    rig.fanout
        .handle_transport_ready(&room, &v.user_id)
        .await
        .expect("reconcile");
    // A second readiness event must not create more consumers
    rig.fanout
        .handle_transport_ready(&room, &v.user_id)
        .await
        .expect("reconcile again");

    let viewer = UserId::from("v");
    let consumers: Vec<_> = rig
        .engine
        .calls()
        .into_iter()
        .filter(|c| matches!(c, EngineCall::CreateConsumer(who, ..) if *who == viewer))
        .collect();
    assert_eq!(consumers.len(), 3, "p1 audio, p1 video, p2 audio, each once");

    let events = drain(&mut v_rx);
    let got = updates(&events);
    // One update per producer per reconciliation pass
    assert_eq!(got.len(), 4);
    let p1_update = got
        .iter()
        .find(|u| u.user_id == UserId::from("p1"))
        .expect("update about p1");
    assert_ne!(p1_update.audio_ssrc, 0);
    assert_ne!(p1_update.video_ssrc, 0);
    assert_ne!(p1_update.rtx_ssrc, 0);
}

#[tokio::test(start_paused = true)]
async fn audio_intent_before_readiness_times_out_silently() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, mut p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    let (_v1, mut v1_rx) = rig.join("r", "v1", RoomType::Call, None).await;

    // Never becomes ready: the 3s gate elapses and the message is
    // discarded without an error to the sender
    rig.fanout
        .handle_producer_state(&room, &p1.user_id, audio_state(111))
        .await
        .expect("discarded silently");

    assert!(!p1.is_producing(MediaKind::Audio));
    assert!(drain(&mut p1_rx).is_empty());
    assert!(drain(&mut v1_rx).is_empty());
    assert!(rig.engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn audio_intent_proceeds_when_readiness_arrives_in_window() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, mut p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    let (_v1, mut v1_rx) = rig.join("r", "v1", RoomType::Call, None).await;

    let ready_soon = Arc::clone(&p1);
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        ready_soon.mark_transport_ready();
    });

    rig.fanout
        .handle_producer_state(&room, &p1.user_id, audio_state(111))
        .await
        .expect("processed after readiness");

    assert!(p1.is_producing(MediaKind::Audio));
    assert!(drain(&mut p1_rx).contains(&SinkEvent::MediaSinkWants(100)));
    assert_eq!(updates(&drain(&mut v1_rx)).len(), 1);
}

#[tokio::test]
async fn video_intent_before_readiness_is_dropped_immediately() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, _p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    let (_v1, mut v1_rx) = rig.join("r", "v1", RoomType::Call, None).await;

    rig.fanout
        .handle_producer_state(&room, &p1.user_id, video_state(0, 222, 223))
        .await
        .expect("dropped");

    assert!(!p1.is_producing(MediaKind::Video));
    assert!(drain(&mut v1_rx).is_empty());
    assert!(rig.engine.calls().is_empty());
}

#[tokio::test]
async fn video_restart_stops_nothing_but_replaces_identifiers_atomically() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p, _p_rx) = rig.join("r", "p", RoomType::Call, None).await;
    let (_v, mut v_rx) = rig.join("r", "v", RoomType::Call, None).await;
    p.mark_transport_ready();

    rig.fanout
        .handle_producer_state(&room, &p.user_id, video_state(111, 1000, 1001))
        .await
        .expect("ssrc A");
    rig.fanout
        .handle_producer_state(&room, &p.user_id, video_state(111, 2000, 2001))
        .await
        .expect("ssrc B");

    // The producer-side track info is B, never a blend of both
    assert_eq!(p.track_info(MediaKind::Video), Some(TrackInfo::video(2000, 2001)));

    // Engine saw publish(A) then publish(B) in order
    let publishes: Vec<_> = rig
        .engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Publish(_, MediaKind::Video, ssrc) => Some(ssrc),
            _ => None,
        })
        .collect();
    assert_eq!(publishes, vec![1000, 2000]);

    // No dispatched update mixes producer-side A and B: consumers keep
    // their own stable engine-assigned identifiers
    for update in updates(&drain(&mut v_rx)) {
        assert!(update.video_ssrc != 1000 && update.video_ssrc != 2000);
        for stream in &update.streams {
            assert_eq!(stream.ssrc, update.video_ssrc);
        }
    }
}

#[tokio::test]
async fn declaring_zero_video_stops_track_and_marks_streams_inactive() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p3, _p3_rx) = rig.join("r", "p3", RoomType::Call, None).await;
    let (_v, mut v_rx) = rig.join("r", "v", RoomType::Call, None).await;
    p3.mark_transport_ready();

    rig.fanout
        .handle_producer_state(&room, &p3.user_id, video_state(111, 222, 223))
        .await
        .expect("producing");
    drain(&mut v_rx);

    // Audio stays, video goes
    rig.fanout
        .handle_producer_state(&room, &p3.user_id, audio_state(111))
        .await
        .expect("video stopped");

    assert!(!p3.is_producing(MediaKind::Video));
    assert!(rig
        .engine
        .calls()
        .contains(&EngineCall::Stop(UserId::from("p3"), MediaKind::Video)));

    let events = drain(&mut v_rx);
    let got = updates(&events);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].video_ssrc, 0, "stopped kind reports 0, never stale");
    assert!(!got[0].streams[0].active, "prior viewers see the stream go inactive");

    // The edge is retained, not deleted
    let room_handle = rig.fanout.registry().get_room(&room).expect("room");
    assert!(room_handle.subscriptions.is_subscribed_to_track(
        &UserId::from("v"),
        &UserId::from("p3"),
        MediaKind::Video
    ));
}

#[tokio::test]
async fn disconnect_notifies_peers_and_destroys_empty_rooms() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p1, _p1_rx) = rig.join("r", "p1", RoomType::Call, None).await;
    let (_p2, mut p2_rx) = rig.join("r", "p2", RoomType::Call, None).await;
    p1.mark_transport_ready();

    rig.fanout.handle_disconnect(&room, &p1.user_id).await;
    assert!(drain(&mut p2_rx).contains(&SinkEvent::Disconnect(UserId::from("p1"))));
    assert_eq!(rig.fanout.registry().room_count(), 1);

    rig.fanout.handle_disconnect(&room, &UserId::from("p2")).await;
    assert_eq!(rig.fanout.registry().room_count(), 0);
}

#[tokio::test]
async fn one_failed_recipient_does_not_block_siblings() {
    let rig = Rig::new();
    let room = RoomId::from("r");

    let (p, _p_rx) = rig.join("r", "p", RoomType::Call, None).await;
    let (_v1, v1_rx) = rig.join("r", "v1", RoomType::Call, None).await;
    let (_v2, mut v2_rx) = rig.join("r", "v2", RoomType::Call, None).await;
    p.mark_transport_ready();

    // v1's connection is gone: its mailbox is closed
    drop(v1_rx);

    rig.fanout
        .handle_producer_state(&room, &p.user_id, audio_state(111))
        .await
        .expect("fanout survives");

    assert_eq!(updates(&drain(&mut v2_rx)).len(), 1, "sibling still served");
}
