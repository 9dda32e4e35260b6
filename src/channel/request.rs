/// Evento ricevuto su un canale `session`, nell'ordine di arrivo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Request(ChannelRequest),
    Data(Vec<u8>),
    Eof,
}

/// Richiesta di canale già decodificata da russh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    PtyReq { term: String, cols: u32, rows: u32 },
    WindowChange { cols: u32, rows: u32 },
    Env { name: String, value: String },
    Shell,
    Exec { command: String },
    Other { kind: String },
}

impl ChannelRequest {
    /// Il comando arriva come byte grezzi; UTF-8 non valido viene sostituito.
    pub fn exec(command: &[u8]) -> Self {
        ChannelRequest::Exec {
            command: String::from_utf8_lossy(command).into_owned(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ChannelRequest::PtyReq { .. } => "pty-req",
            ChannelRequest::WindowChange { .. } => "window-change",
            ChannelRequest::Env { .. } => "env",
            ChannelRequest::Shell => "shell",
            ChannelRequest::Exec { .. } => "exec",
            ChannelRequest::Other { kind } => kind,
        }
    }
}
