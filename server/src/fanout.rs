//! Applying pose updates and building the per-request fan-out response
//!
//! The protocol is strictly request/response: a client only learns about
//! other players by sending its own update or a spectator poll. Both paths run
//! entirely under the registry lock, so the response reflects one consistent
//! view of every other player.

use crate::error::Rejection;
use crate::registry::Registry;
use pose_shared::{encode_records, PoseUpdate, CLOTHES_TARGET};
use std::net::SocketAddr;
use std::time::Instant;

/// Claims the update's player for `user`, stores its targets and returns the
/// state of every other player
pub fn handle_update(
    registry: &mut Registry,
    user: SocketAddr,
    update: &PoseUpdate,
    now: Instant,
) -> Result<Vec<u8>, Rejection> {
    registry.claim(user, &update.player)?;

    if let Some(player) = registry.player_mut(&update.player) {
        for target in &update.targets {
            player.set_target(&target.name, &target.payload);
        }
    }

    Ok(collect_response(registry, user, Some(&update.player), now))
}

/// Puts `user` in spectator mode and returns the state of every player
pub fn handle_spectate(
    registry: &mut Registry,
    user: SocketAddr,
    now: Instant,
) -> Result<Vec<u8>, Rejection> {
    registry.spectate(user)?;
    Ok(collect_response(registry, user, None, now))
}

/// Encodes every player's targets except those of `exclude`
///
/// Clothes records are included only when the requesting user has not
/// received clothes within the throttle interval; including them restarts
/// the interval.
pub fn collect_response(
    registry: &mut Registry,
    user: SocketAddr,
    exclude: Option<&[u8]>,
    now: Instant,
) -> Vec<u8> {
    let clothes_due = registry.clothes_due(user, now);

    let (response, clothes_sent) = {
        let records: Vec<(&[u8], &[u8], &[u8])> = registry
            .players()
            .filter(|(name, _)| Some(*name) != exclude)
            .flat_map(|(name, player)| {
                player
                    .targets()
                    .map(move |(target, payload)| (name, target, payload))
            })
            .filter(|(_, target, _)| clothes_due || *target != CLOTHES_TARGET)
            .collect();

        let clothes_sent = records
            .iter()
            .any(|(_, target, _)| *target == CLOTHES_TARGET);

        (encode_records(records), clothes_sent)
    };

    if clothes_sent {
        registry.mark_clothes_sent(user, now);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceHandle;
    use crate::registry::Limits;
    use pose_shared::{parse_records, parse_request, Request};
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn registry() -> Registry {
        Registry::new(Limits::default(), PresenceHandle::disabled())
    }

    fn update(message: &[u8]) -> PoseUpdate {
        match parse_request(message).unwrap() {
            Request::Update(update) => update,
            other => panic!("Unexpected request: {:?}", other),
        }
    }

    fn body(response: &[u8]) -> &[u8] {
        &response[..response.len() - 1]
    }

    #[test]
    fn test_first_player_gets_none() {
        let mut registry = registry();
        let now = Instant::now();

        let response = handle_update(
            &mut registry,
            addr(1),
            &update(b"Alice;hip,1,2,3,0,0,0,1;head,0,1,0,0,0,0,1"),
            now,
        )
        .unwrap();

        assert_eq!(response, b"none|".to_vec());
    }

    #[test]
    fn test_second_player_sees_first_verbatim() {
        let mut registry = registry();
        let now = Instant::now();

        handle_update(
            &mut registry,
            addr(1),
            &update(b"Alice;hip,1,2,3,0,0,0,1;head,0,1,0,0,0,0,1"),
            now,
        )
        .unwrap();
        let response = handle_update(
            &mut registry,
            addr(2),
            &update(b"Bob;hip,4,5,6,0,0,0,1;head,0,2,0,0,0,0,1"),
            now,
        )
        .unwrap();

        let text = String::from_utf8(response).unwrap();
        assert_eq!(
            text,
            "Alice,head,0,1,0,0,0,0,1;Alice,hip,1,2,3,0,0,0,1|"
        );
        assert!(!text.contains("Bob"));
    }

    #[test]
    fn test_sender_never_sees_itself() {
        let mut registry = registry();
        let now = Instant::now();

        handle_update(&mut registry, addr(1), &update(b"X;hip,1;head,1"), now).unwrap();
        handle_update(&mut registry, addr(2), &update(b"Y;hip,2;head,2"), now).unwrap();
        let response =
            handle_update(&mut registry, addr(1), &update(b"X;hip,3;head,3"), now).unwrap();

        let records = parse_records(body(&response));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.player == b"Y"));
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = registry();
        let now = Instant::now();

        handle_update(&mut registry, addr(1), &update(b"X;hip,1;head,1"), now).unwrap();
        handle_update(&mut registry, addr(1), &update(b"X;hip,9;hand,5"), now).unwrap();

        let player = registry.player(b"X").unwrap();
        assert_eq!(player.target(b"hip"), Some(&b"9"[..]));
        assert_eq!(player.target(b"head"), Some(&b"1"[..]));
        assert_eq!(player.target(b"hand"), Some(&b"5"[..]));
    }

    #[test]
    fn test_conflicting_update_changes_nothing() {
        let mut registry = registry();
        let now = Instant::now();

        handle_update(&mut registry, addr(1), &update(b"X;hip,1;head,1"), now).unwrap();
        let err = handle_update(&mut registry, addr(2), &update(b"X;hip,666;head,666"), now)
            .unwrap_err();

        assert!(matches!(err, Rejection::PlayerTaken { .. }));
        assert_eq!(registry.player(b"X").unwrap().target(b"hip"), Some(&b"1"[..]));
        assert_eq!(registry.owner_of(b"X"), Some(addr(1)));
    }

    #[test]
    fn test_clothes_throttle() {
        let mut registry = registry();
        let start = Instant::now();

        handle_update(
            &mut registry,
            addr(1),
            &update(b"Alice;hip,1;CLOTHES,dress,red"),
            start,
        )
        .unwrap();

        let first =
            handle_update(&mut registry, addr(2), &update(b"Bob;hip,2;head,2"), start).unwrap();
        let second = handle_update(
            &mut registry,
            addr(2),
            &update(b"Bob;hip,2;head,2"),
            start + Duration::from_millis(500),
        )
        .unwrap();
        let third = handle_update(
            &mut registry,
            addr(2),
            &update(b"Bob;hip,2;head,2"),
            start + Duration::from_millis(2100),
        )
        .unwrap();

        let has_clothes = |response: &[u8]| {
            parse_records(body(response))
                .iter()
                .any(|record| record.target == CLOTHES_TARGET)
        };

        assert!(has_clothes(&first));
        assert!(!has_clothes(&second));
        assert!(has_clothes(&third));
        // Non-clothes targets are never throttled
        assert!(String::from_utf8_lossy(&second).contains("Alice,hip,1"));
    }

    #[test]
    fn test_clothes_throttle_is_per_user() {
        let mut registry = registry();
        let now = Instant::now();

        handle_update(&mut registry, addr(1), &update(b"A;hip,1;CLOTHES,x"), now).unwrap();
        let bob = handle_update(&mut registry, addr(2), &update(b"B;hip,2;head,2"), now).unwrap();
        let carol = handle_spectate(&mut registry, addr(3), now).unwrap();

        assert!(String::from_utf8_lossy(&bob).contains("A,CLOTHES,x"));
        assert!(String::from_utf8_lossy(&carol).contains("A,CLOTHES,x"));
    }

    #[test]
    fn test_clock_not_restarted_without_clothes() {
        let mut registry = registry();
        let start = Instant::now();

        handle_update(&mut registry, addr(1), &update(b"A;hip,1;head,1"), start).unwrap();
        handle_update(&mut registry, addr(2), &update(b"B;hip,2;head,2"), start).unwrap();
        assert!(registry.clothes_due(addr(2), start));

        handle_update(
            &mut registry,
            addr(1),
            &update(b"A;hip,1;CLOTHES,x"),
            start + Duration::from_millis(100),
        )
        .unwrap();
        let response = handle_update(
            &mut registry,
            addr(2),
            &update(b"B;hip,2;head,2"),
            start + Duration::from_millis(200),
        )
        .unwrap();

        assert!(String::from_utf8_lossy(&response).contains("CLOTHES"));
    }

    #[test]
    fn test_release_on_switch_hides_old_player() {
        let mut registry = registry();
        let now = Instant::now();

        handle_update(&mut registry, addr(1), &update(b"X;hip,1;head,1"), now).unwrap();
        handle_update(&mut registry, addr(1), &update(b"Y;hip,1;head,1"), now).unwrap();
        let response = handle_spectate(&mut registry, addr(2), now).unwrap();

        let records = parse_records(body(&response));
        assert!(records.iter().all(|record| record.player == b"Y"));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_spectator_sees_everyone() {
        let mut registry = registry();
        let now = Instant::now();

        assert_eq!(
            handle_spectate(&mut registry, addr(9), now).unwrap(),
            b"none|".to_vec()
        );

        handle_update(&mut registry, addr(1), &update(b"X;hip,1;head,1"), now).unwrap();
        handle_update(&mut registry, addr(2), &update(b"Y;hip,2;head,2"), now).unwrap();

        let response = handle_spectate(&mut registry, addr(9), now).unwrap();
        let records = parse_records(body(&response));
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn test_update_without_targets_still_claims() {
        let mut registry = registry();
        let now = Instant::now();

        let response = handle_update(&mut registry, addr(1), &update(b"X;;"), now).unwrap();

        assert_eq!(response, b"none|".to_vec());
        assert_eq!(registry.owner_of(b"X"), Some(addr(1)));
        assert!(registry.player(b"X").unwrap().is_empty());
    }
}
