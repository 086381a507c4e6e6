//! Property-based codec tests for the wire protocol.
//!
//! Uses proptest to verify:
//! 1. Any `ChatMessage` broadcast survives encode → decode.
//! 2. Any `SendMessage` submission survives encode → decode.
//! 3. Random bytes never cause a panic in either decoder.

use claimchat_proto::codec;
use claimchat_proto::event::{ClientEvent, ServerEvent};
use claimchat_proto::message::*;
use proptest::prelude::*;

fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-z0-9_-]{1,32}".prop_map(UserId::new)
}

fn arb_room_id() -> impl Strategy<Value = RoomId> {
    "[0-9]{1,12}".prop_map(RoomId::new)
}

fn arb_content() -> impl Strategy<Value = String> {
    "[^\x00]{1,512}"
}

fn arb_chat_message() -> impl Strategy<Value = ChatMessage> {
    (
        any::<u64>(),
        proptest::option::of(any::<u64>()),
        arb_room_id(),
        arb_user_id(),
        arb_user_id(),
        arb_content(),
        any::<u64>(),
    )
        .prop_map(
            |(id, temp_id, room_id, sender_id, receiver_id, content, created_at)| ChatMessage {
                id: MessageId::new(id),
                temp_id: temp_id.map(TempId::new),
                room_id,
                sender_id,
                receiver_id,
                content,
                created_at: Timestamp::from_millis(created_at),
            },
        )
}

fn arb_outgoing() -> impl Strategy<Value = OutgoingMessage> {
    (
        arb_room_id(),
        arb_user_id(),
        arb_user_id(),
        arb_content(),
        any::<u64>(),
    )
        .prop_map(
            |(room_id, sender_id, receiver_id, content, temp_id)| OutgoingMessage {
                room_id,
                sender_id,
                receiver_id,
                content,
                temp_id: TempId::new(temp_id),
            },
        )
}

proptest! {
    #[test]
    fn broadcast_survives_codec(msg in arb_chat_message()) {
        let event = ServerEvent::MessageReceived(msg);
        let bytes = codec::encode_server(&event).unwrap();
        prop_assert_eq!(codec::decode_server(&bytes).unwrap(), event);
    }

    #[test]
    fn submission_survives_codec(msg in arb_outgoing()) {
        let event = ClientEvent::SendMessage(msg);
        let bytes = codec::encode_client(&event).unwrap();
        prop_assert_eq!(codec::decode_client(&bytes).unwrap(), event);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode_client(&bytes);
        let _ = codec::decode_server(&bytes);
    }
}
