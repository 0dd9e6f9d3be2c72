use std::collections::HashMap;

use uuid::Uuid;

use crate::models::Participant;
use crate::sync::room::Subscriber;

/// Derive the participant list from a room's current subscribers.
///
/// One entry per session; `session_ids` aggregates every open session of
/// the same user so clients can tell multi-tab users apart. The list is
/// sorted so repeated broadcasts of the same membership are identical.
pub fn participant_list(subscribers: &HashMap<Uuid, Subscriber>) -> Vec<Participant> {
    let mut sessions_by_user: HashMap<&str, Vec<Uuid>> = HashMap::new();
    for sub in subscribers.values() {
        sessions_by_user
            .entry(sub.session.user.id.as_str())
            .or_default()
            .push(sub.session.session_id);
    }
    for ids in sessions_by_user.values_mut() {
        ids.sort();
    }

    let mut list: Vec<Participant> = subscribers
        .values()
        .map(|sub| Participant {
            id: sub.session.user.id.clone(),
            name: sub.session.user.name.clone(),
            session_id: sub.session.session_id,
            session_ids: sessions_by_user[sub.session.user.id.as_str()].clone(),
        })
        .collect();
    list.sort_by(|a, b| (&a.id, a.session_id).cmp(&(&b.id, b.session_id)));
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session_registry::AuthedUser;
    use crate::sync::session::SessionHandle;
    use tokio::sync::mpsc;

    fn subscriber(user_id: &str, session_id: Uuid) -> Subscriber {
        let (tx, _rx) = mpsc::channel(1);
        Subscriber {
            session: SessionHandle {
                session_id,
                user: AuthedUser {
                    id: user_id.to_string(),
                    name: user_id.to_string(),
                },
                can_edit: true,
                outbound: tx,
            },
            acknowledged_version: 0,
        }
    }

    #[test]
    fn aggregates_sessions_of_the_same_user() {
        let mut subs = HashMap::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let s3 = Uuid::new_v4();
        subs.insert(s1, subscriber("alice", s1));
        subs.insert(s2, subscriber("alice", s2));
        subs.insert(s3, subscriber("bob", s3));

        let list = participant_list(&subs);
        assert_eq!(list.len(), 3);
        let alice_entry = list.iter().find(|p| p.session_id == s1).unwrap();
        assert_eq!(alice_entry.session_ids.len(), 2);
        let bob_entry = list.iter().find(|p| p.id == "bob").unwrap();
        assert_eq!(bob_entry.session_ids, vec![s3]);
    }

    #[test]
    fn list_is_stable_across_calls() {
        let mut subs = HashMap::new();
        for _ in 0..5 {
            let id = Uuid::new_v4();
            subs.insert(id, subscriber("carol", id));
        }
        assert_eq!(participant_list(&subs), participant_list(&subs));
    }
}
