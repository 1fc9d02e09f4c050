//! Message Dispatcher (spec.md §4.10 / C10): routes a decoded inbound
//! request to the handler for its method and answers with a `Response` or,
//! on failure, an `ERROR`. Every handler is side-effect-free on its failure
//! paths — a rejected write reads nothing back from storage and a malformed
//! request never reaches `boson-store` at all.

use std::net::SocketAddr;
use std::sync::Arc;

use boson_crypto::Id;
use boson_proto::{
    DhtError, NodeInfo, Query, Response, WANT_IPV4, WANT_IPV6, WANT_TOKEN,
};
use boson_routing::{RoutingTable, K};
use boson_rpc::{InboundRequest, TokenManager};
use boson_store::Storage;
use tokio::sync::Mutex;
use tracing::{trace, warn};

pub struct Dispatcher {
    storage: Arc<Storage>,
    table: Arc<Mutex<RoutingTable>>,
    tokens: Arc<Mutex<TokenManager>>,
}

impl Dispatcher {
    pub fn new(storage: Arc<Storage>, table: Arc<Mutex<RoutingTable>>, tokens: Arc<Mutex<TokenManager>>) -> Self {
        Dispatcher { storage, table, tokens }
    }

    /// Drain `inbound` forever, answering each request in its own task so a
    /// slow storage write never stalls the next datagram's dispatch.
    pub async fn run(self: Arc<Self>, mut inbound: tokio::sync::mpsc::UnboundedReceiver<InboundRequest>) {
        while let Some(request) = inbound.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle(request).await;
            });
        }
    }

    pub async fn handle(&self, request: InboundRequest) {
        // A self-reported sender id paired with the physically observed
        // address is enough to learn a first-seen contact (spec.md §3/§4.5);
        // the address half is never taken from the request body, only from
        // where the datagram actually came from.
        if let Some(sender) = request.sender {
            self.table.lock().await.add(NodeInfo::new(sender, request.remote_addr));
        }

        let result = self.dispatch(&request.query, request.remote_addr).await;
        let outcome = match result {
            Ok(response) => request.respond(response).await,
            Err(err) => {
                trace!(?err, addr = %request.remote_addr, "request failed");
                request.respond_error(err).await
            }
        };
        if let Err(e) = outcome {
            warn!(error = %e, "failed to send dispatcher reply");
        }
    }

    async fn dispatch(&self, query: &Query, remote_addr: SocketAddr) -> Result<Response, DhtError> {
        match query {
            Query::Ping => Ok(Response::Ping),
            Query::FindNode { target, want } => self.find_node(remote_addr, *target, *want).await,
            Query::FindValue { target, cas, want } => self.find_value(remote_addr, *target, *cas, *want).await,
            Query::FindPeer { target, want } => self.find_peer(remote_addr, *target, *want).await,
            Query::StoreValue {
                value,
                expected_sequence,
                token,
                persistent,
            } => {
                self.store_value(remote_addr, value.clone(), *expected_sequence, *token, *persistent)
                    .await
            }
            Query::AnnouncePeer {
                target,
                peer,
                peer_id: _,
                token,
                persistent,
            } => self.announce_peer(remote_addr, *target, peer.clone(), *token, *persistent).await,
        }
    }

    async fn closest_by_family(&self, target: &Id, want: u8) -> (Vec<NodeInfo>, Vec<NodeInfo>) {
        let table = self.table.lock().await;
        let candidates = table.closest(target, K * 2);
        let nodes4 = if want & WANT_IPV4 != 0 {
            candidates.iter().filter(|n| n.is_ipv4()).take(K).cloned().collect()
        } else {
            Vec::new()
        };
        let nodes6 = if want & WANT_IPV6 != 0 {
            candidates.iter().filter(|n| n.is_ipv6()).take(K).cloned().collect()
        } else {
            Vec::new()
        };
        (nodes4, nodes6)
    }

    async fn maybe_issue_token(&self, remote_addr: SocketAddr, target: &Id, want: u8) -> Option<u32> {
        if want & WANT_TOKEN == 0 {
            return None;
        }
        Some(self.tokens.lock().await.issue(remote_addr, target))
    }

    async fn find_node(&self, remote_addr: SocketAddr, target: Id, want: u8) -> Result<Response, DhtError> {
        let (nodes4, nodes6) = self.closest_by_family(&target, want).await;
        let token = self.maybe_issue_token(remote_addr, &target, want).await;
        Ok(Response::FindNode { nodes4, nodes6, token })
    }

    async fn find_value(
        &self,
        remote_addr: SocketAddr,
        target: Id,
        cas: i64,
        want: u8,
    ) -> Result<Response, DhtError> {
        let stored = self.storage.get_value(&target).await;
        let value = match stored {
            Some(v) if v.sequence_number().map(|seq| seq as i64 > cas).unwrap_or(true) => Some(v),
            _ => None,
        };
        // Always attach closest nodes unless the value alone already
        // satisfies the asker (spec.md §4.10).
        let (nodes4, nodes6) = if value.is_some() {
            (Vec::new(), Vec::new())
        } else {
            self.closest_by_family(&target, want).await
        };
        let token = self.maybe_issue_token(remote_addr, &target, want).await;
        Ok(Response::FindValue {
            value,
            nodes4,
            nodes6,
            token,
        })
    }

    async fn find_peer(&self, remote_addr: SocketAddr, target: Id, want: u8) -> Result<Response, DhtError> {
        let peers = self.storage.get_peers(&target, K).await;
        let (nodes4, nodes6) = if peers.len() >= K {
            (Vec::new(), Vec::new())
        } else {
            self.closest_by_family(&target, want).await
        };
        let token = self.maybe_issue_token(remote_addr, &target, want).await;
        Ok(Response::FindPeer {
            peers,
            nodes4,
            nodes6,
            token,
        })
    }

    async fn store_value(
        &self,
        remote_addr: SocketAddr,
        value: boson_proto::Value,
        expected_sequence: Option<u64>,
        token: u32,
        persistent: bool,
    ) -> Result<Response, DhtError> {
        let id = value.id();
        if !self.tokens.lock().await.validate(token, remote_addr, &id) {
            return Err(DhtError::invalid_token());
        }
        self.storage.put_value(value, expected_sequence, persistent, true).await?;
        Ok(Response::StoreValue)
    }

    async fn announce_peer(
        &self,
        remote_addr: SocketAddr,
        target: Id,
        peer: boson_proto::PeerInfo,
        token: u32,
        persistent: bool,
    ) -> Result<Response, DhtError> {
        if !self.tokens.lock().await.validate(token, remote_addr, &target) {
            return Err(DhtError::invalid_token());
        }
        self.storage.put_peer(target, peer, persistent, true).await?;
        Ok(Response::AnnouncePeer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boson_crypto::Keypair;
    use boson_proto::{PeerInfo, Value};

    fn addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    fn dispatcher() -> Dispatcher {
        let storage = Arc::new(Storage::new());
        let table = Arc::new(Mutex::new(RoutingTable::new(Id::random())));
        let tokens = Arc::new(Mutex::new(TokenManager::new()));
        Dispatcher::new(storage, table, tokens)
    }

    #[tokio::test]
    async fn ping_is_answered_immediately() {
        let d = dispatcher();
        let response = d.dispatch(&Query::Ping, addr()).await.unwrap();
        assert!(matches!(response, Response::Ping));
    }

    #[tokio::test]
    async fn find_node_issues_a_token_only_when_requested() {
        let d = dispatcher();
        let target = Id::random();
        let without = d
            .dispatch(&Query::FindNode { target, want: WANT_IPV4 }, addr())
            .await
            .unwrap();
        assert!(matches!(without, Response::FindNode { token: None, .. }));

        let with = d
            .dispatch(
                &Query::FindNode {
                    target,
                    want: WANT_IPV4 | WANT_TOKEN,
                },
                addr(),
            )
            .await
            .unwrap();
        assert!(matches!(with, Response::FindNode { token: Some(_), .. }));
    }

    #[tokio::test]
    async fn store_value_rejects_an_invalid_token() {
        let d = dispatcher();
        let kp = Keypair::generate();
        let value = Value::signed(&kp, b"hello".to_vec()).unwrap();
        let err = d
            .dispatch(
                &Query::StoreValue {
                    value,
                    expected_sequence: None,
                    token: 0xdead_beef,
                    persistent: false,
                },
                addr(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, boson_proto::ErrorCode::InvalidToken);
    }

    #[tokio::test]
    async fn store_value_with_a_valid_token_round_trips_through_find_value() {
        let d = dispatcher();
        let kp = Keypair::generate();
        let value = Value::signed(&kp, b"hello".to_vec()).unwrap();
        let id = value.id();
        let token = d.tokens.lock().await.issue(addr(), &id);

        d.dispatch(
            &Query::StoreValue {
                value,
                expected_sequence: None,
                token,
                persistent: false,
            },
            addr(),
        )
        .await
        .unwrap();

        let response = d
            .dispatch(
                &Query::FindValue {
                    target: id,
                    cas: -1,
                    want: 0,
                },
                addr(),
            )
            .await
            .unwrap();
        match response {
            Response::FindValue { value: Some(v), .. } => assert_eq!(v.id(), id),
            other => panic!("expected a value, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn announce_peer_requires_a_valid_token_for_its_target() {
        let d = dispatcher();
        let target = Id::random();
        let peer_kp = Keypair::generate();
        let peer = PeerInfo::create(&peer_kp, 0, "https://svc".into(), None, None).unwrap();

        let err = d
            .dispatch(
                &Query::AnnouncePeer {
                    target,
                    peer: peer.clone(),
                    peer_id: None,
                    token: 1,
                    persistent: false,
                },
                addr(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, boson_proto::ErrorCode::InvalidToken);

        let token = d.tokens.lock().await.issue(addr(), &target);
        d.dispatch(
            &Query::AnnouncePeer {
                target,
                peer,
                peer_id: None,
                token,
                persistent: false,
            },
            addr(),
        )
        .await
        .unwrap();

        let response = d.dispatch(&Query::FindPeer { target, want: 0 }, addr()).await.unwrap();
        match response {
            Response::FindPeer { peers, .. } => assert_eq!(peers.len(), 1),
            other => panic!("expected peers, got {other:?}"),
        }
    }
}
