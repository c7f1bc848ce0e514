//! Wire encoding: MessagePack with named fields, JSON text accepted inbound

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Frame encoding errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message for a binary frame
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decode a binary frame
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decode a text frame
pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::game::combat::RocketType;
    use crate::game::{ClientCoordinator, ServerCoordinator};
    use crate::game::input::{InputEvent, ThrustDir};
    use crate::game::state::{Game, GameOptions};
    use crate::game::terrain::Moon;
    use crate::ws::protocol::{ClientMsg, ServerMsg};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    #[test]
    fn client_input_survives_msgpack() {
        let msg = ClientMsg::Input {
            epoch: Uuid::new_v4(),
            player: Uuid::new_v4(),
            tick: 812,
            event: InputEvent::fire(RocketType::Big),
        };
        let decoded: ClientMsg = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn json_text_frames_are_accepted() {
        let epoch = Uuid::new_v4();
        let player = Uuid::new_v4();
        let text = format!(
            r#"{{"input":{{"epoch":"{epoch}","player":"{player}","tick":7,"event":{{"thrust":{{"dir":"up","active":true}}}}}}}}"#
        );
        let msg: ClientMsg = decode_text(&text).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Input {
                epoch,
                player,
                tick: 7,
                event: InputEvent::Thrust {
                    dir: ThrustDir::Up,
                    active: true,
                },
            }
        );
    }

    #[test]
    fn full_state_reset_decodes_into_an_equal_game() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let game = Game::create_new(GameOptions::default(), Some(Moon::flat(800.0, 600.0, 40.0)), &mut rng);
        let msg = ServerMsg::Reset {
            epoch: game.id,
            tick: 90,
            full: game.serialize_full().unwrap(),
        };

        let decoded: ServerMsg = decode(&encode(&msg).unwrap()).unwrap();
        let ServerMsg::Reset { epoch, tick, full } = decoded else {
            panic!("expected reset");
        };
        assert_eq!((epoch, tick), (game.id, 90));
        let replica = Game::from_full(&full).unwrap();
        assert_eq!(replica.moon, game.moon);
        assert_eq!(replica.landing_pads, game.landing_pads);
    }

    #[test]
    fn client_learns_its_lander_from_decoded_frames() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let game = Game::create_new(GameOptions::default(), Some(Moon::flat(800.0, 600.0, 40.0)), &mut rng);
        let mut server = ServerCoordinator::with_game(game, EngineConfig::server(), rng);
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        let epoch = server.game().id;
        server.handle_message(
            conn,
            ClientMsg::Join {
                epoch,
                tick: server.tick(),
                name: "pilot".into(),
                color: None,
            },
        );

        // Everything the client sees went through the wire encoding
        let mut frames = server
            .take_outgoing()
            .into_iter()
            .filter(|o| o.to.includes(conn))
            .map(|o| decode::<ServerMsg>(&encode(o.msg.as_ref()).unwrap()).unwrap());
        let init = frames.next().unwrap();
        let mut client = ClientCoordinator::from_init(&init, EngineConfig::client()).unwrap();
        assert_eq!(client.player_id(), conn);

        for msg in frames {
            client.handle_message(msg);
        }
        client.step();
        assert!(client.self_lander().is_some());
        assert!(client.process_local_input(InputEvent::Thrust {
            dir: ThrustDir::Up,
            active: true,
        }));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode::<ClientMsg>(&[0xc1, 0x00]), Err(CodecError::Decode(_))));
        assert!(matches!(decode_text::<ClientMsg>("{"), Err(CodecError::Json(_))));
    }
}
