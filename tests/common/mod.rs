#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use woosh::{
    ApiGateway, Backend, Config, Cryptography, Error, MemoryBackend, Method, Request, Result,
    SealFormat, Utils, Woosh,
};

pub const START_TIME: f64 = 1_700_000_000.0;

struct ServerUser {
    id: u64,
    username: String,
    password: String,
    private_key: String,
    public_key: String,
}

struct ServerMessage {
    id: u64,
    from_user: String,
    to_user: String,
    contents: String,
    sent_at: f64,
}

#[derive(Default)]
struct State {
    users: Vec<ServerUser>,
    messages: Vec<ServerMessage>,
    next_id: u64,
    clock: f64,
    omit_query_time: bool,
    log: Vec<(Method, String)>,
}

/// In-process stand-in for the messaging server.
pub struct FakeServer {
    state: Mutex<State>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_id: 1,
                clock: START_TIME,
                ..State::default()
            }),
        })
    }

    /// Queues a message without going through a client.
    pub fn inject_message(&self, from: &str, to: &str, contents: &str) {
        let mut state = self.state.lock();
        let (id, sent_at) = state.tick();
        state.messages.push(ServerMessage {
            id,
            from_user: from.into(),
            to_user: to.into(),
            contents: contents.into(),
            sent_at,
        });
    }

    /// Answers `GET /messages` without a `queryTime`, like an older server.
    pub fn omit_query_time(&self) {
        self.state.lock().omit_query_time = true;
    }

    pub fn pending_for(&self, username: &str) -> usize {
        let state = self.state.lock();
        state.messages.iter().filter(|m| m.to_user == username).count()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        let state = self.state.lock();
        state
            .log
            .iter()
            .filter(|(m, p)| *m == method && p == path)
            .count()
    }

    fn handle(&self, request: &Request) -> Result<Value> {
        let mut state = self.state.lock();
        state.log.push((request.method, request.path.clone()));

        match (request.method, request.path.as_str()) {
            (Method::Post, "/users") => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let username = field(&body, "username");
                if state.users.iter().any(|u| u.username == username) {
                    return Err(status(409, "username taken"));
                }
                let (id, _) = state.tick();
                let user = ServerUser {
                    id,
                    username,
                    password: field(&body, "password"),
                    private_key: field(&body, "privateKey"),
                    public_key: field(&body, "publicKey"),
                };
                let view = user.own_view();
                state.users.push(user);
                Ok(view)
            }
            (Method::Get, "/users/me") => {
                let me = state.authenticate(request)?;
                Ok(state.users[me].own_view())
            }
            (Method::Get, "/users/friends") => {
                state.authenticate(request)?;
                let wanted = request.params.get("username").and_then(Value::as_str);
                state
                    .users
                    .iter()
                    .find(|u| Some(u.username.as_str()) == wanted)
                    .map(ServerUser::public_view)
                    .ok_or_else(|| status(404, "no such user"))
            }
            (Method::Post, "/messages") => {
                let me = state.authenticate(request)?;
                let body = request.body.clone().unwrap_or(Value::Null);
                let recipient = field(&body, "recipient");
                if !state.users.iter().any(|u| u.username == recipient) {
                    return Err(status(404, "no such recipient"));
                }
                let from_user = state.users[me].username.clone();
                let (id, sent_at) = state.tick();
                let message = ServerMessage {
                    id,
                    from_user,
                    to_user: recipient,
                    contents: field(&body, "contents"),
                    sent_at,
                };
                let view = message.view();
                state.messages.push(message);
                Ok(view)
            }
            (Method::Get, "/messages") => {
                let me = state.authenticate(request)?;
                let username = state.users[me].username.clone();
                let messages: Vec<_> = state
                    .messages
                    .iter()
                    .filter(|m| m.to_user == username)
                    .map(ServerMessage::view)
                    .collect();
                if state.omit_query_time {
                    return Ok(json!({"messages": messages}));
                }
                Ok(json!({"queryTime": state.clock, "messages": messages}))
            }
            (Method::Delete, "/messages") => {
                let me = state.authenticate(request)?;
                let username = state.users[me].username.clone();
                let until = request
                    .params
                    .get("until")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| status(400, "missing until"))?;
                state
                    .messages
                    .retain(|m| !(m.to_user == username && m.sent_at <= until));
                Ok(Value::Null)
            }
            _ => Err(status(404, "no such route")),
        }
    }
}

#[async_trait]
impl ApiGateway for FakeServer {
    async fn request(&self, request: Request) -> Result<Value> {
        tokio::task::yield_now().await;
        self.handle(&request)
    }
}

impl State {
    fn tick(&mut self) -> (u64, f64) {
        let id = self.next_id;
        self.next_id += 1;
        self.clock += 1.0;
        (id, self.clock)
    }

    fn authenticate(&self, request: &Request) -> Result<usize> {
        let credentials = request
            .credentials
            .as_ref()
            .ok_or_else(|| status(401, "missing credentials"))?;
        self.users
            .iter()
            .position(|u| u.username == credentials.username && u.password == credentials.password)
            .ok_or_else(|| status(401, "bad credentials"))
    }
}

impl ServerUser {
    fn own_view(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "privateKey": self.private_key,
            "publicKey": self.public_key,
            "info": null,
        })
    }

    fn public_view(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "publicKey": self.public_key,
        })
    }
}

impl ServerMessage {
    fn view(&self) -> Value {
        json!({
            "id": self.id,
            "fromUser": self.from_user,
            "toUser": self.to_user,
            "contents": self.contents,
            "sentAt": self.sent_at,
        })
    }
}

fn field(body: &Value, name: &str) -> String {
    body.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn status(code: u16, message: &str) -> Error {
    Error::Transport {
        status: Some(code),
        message: message.into(),
    }
}

pub fn config(clear_history: bool) -> Config {
    Config {
        api_url: "http://fake.invalid".into(),
        data_dir: PathBuf::from("unused"),
        key_bits: 1024,
        poll_interval: Duration::from_millis(20),
        clear_history,
        seal_format: SealFormat::Legacy,
    }
}

pub fn client(server: &Arc<FakeServer>) -> Woosh {
    client_with(server, Arc::new(MemoryBackend::new()), true)
}

pub fn client_with(server: &Arc<FakeServer>, backend: Arc<dyn Backend>, clear_history: bool) -> Woosh {
    client_with_config(server, backend, config(clear_history))
}

pub fn client_with_config(server: &Arc<FakeServer>, backend: Arc<dyn Backend>, config: Config) -> Woosh {
    let crypto = Cryptography::new(config.key_bits).with_seal_format(config.seal_format);
    let utils = Utils::new(server.clone(), crypto);
    Woosh::with_parts(config, backend, utils).unwrap()
}
