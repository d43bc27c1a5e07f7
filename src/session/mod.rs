//! Peer sessions: bind the wire protocol to an arbitrary byte duplex.
//!
//! [`PeerSession`] is the client side: fetch negotiates and imports a pack,
//! push enumerates, packs and reports. [`serve`] runs the server side
//! of either service on the same kind of duplex. [`ChannelDuplex`] is the
//! in-process transport used by tests and local pairing; HTTP or
//! peer-to-peer substrates implement [`Duplex`] the same way.

pub mod refspec;

use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    cancel::CancelToken,
    errors::GitError,
    hash::ObjectId,
    history,
    internal::pack::{Pack, PackEncoder, entry::Entry},
    protocol::{
        link::{Packet, PktLink},
        smart::SmartServer,
        types::{Capability, Duplex, GitRef, ProtocolError, ServiceType},
        utils::read_until_white_space,
    },
    repository::Repository,
};

pub use refspec::Refspec;

/// In-process duplex over a pair of byte channels. `close` drops the sender,
/// which the peer observes as EOF (half-close).
pub struct ChannelDuplex {
    sender: Option<mpsc::Sender<Bytes>>,
    receiver: mpsc::Receiver<Bytes>,
}

impl ChannelDuplex {
    /// Two connected endpoints.
    pub fn pair() -> (ChannelDuplex, ChannelDuplex) {
        let (tx_a, rx_a) = mpsc::channel(64);
        let (tx_b, rx_b) = mpsc::channel(64);
        (
            ChannelDuplex {
                sender: Some(tx_a),
                receiver: rx_b,
            },
            ChannelDuplex {
                sender: Some(tx_b),
                receiver: rx_a,
            },
        )
    }
}

#[async_trait]
impl Duplex for ChannelDuplex {
    async fn send(&mut self, data: Bytes) -> Result<(), ProtocolError> {
        match &self.sender {
            Some(sender) => sender
                .send(data)
                .await
                .map_err(|_| ProtocolError::Closed),
            None => Err(ProtocolError::Closed),
        }
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        Ok(self.receiver.recv().await)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.sender.take();
        Ok(())
    }
}

/// Progress callback: `(phase, message)`.
pub type ProgressFn = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Options for [`PeerSession::fetch`].
pub struct FetchOptions {
    pub refspecs: Vec<Refspec>,
    /// Carried for configuration parity; tag auto-following is not acted
    /// upon.
    pub tags: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            refspecs: vec![Refspec::from_str("+refs/heads/*:refs/heads/*")
                .expect("default refspec parses")],
            tags: false,
        }
    }
}

/// What a fetch changed.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// (local ref, new id) pairs written.
    pub updated: Vec<(String, ObjectId)>,
    pub objects_imported: usize,
}

/// Options for [`PeerSession::push`].
#[derive(Default)]
pub struct PushOptions {
    pub refspecs: Vec<Refspec>,
    /// Skip the client-side fast-forward validation.
    pub force: bool,
}

/// Per-ref push results as reported by the server.
#[derive(Debug, Default)]
pub struct PushOutcome {
    pub unpack_ok: bool,
    /// (ref name, error); a `None` error means the update succeeded.
    pub results: Vec<(String, Option<String>)>,
}

impl PushOutcome {
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.results.iter().all(|(_, error)| error.is_none())
    }
}

/// Client side of the smart protocol over one duplex.
pub struct PeerSession<'a> {
    repo: &'a Repository,
    progress: Option<ProgressFn>,
    cancel: CancelToken,
}

impl<'a> PeerSession<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        PeerSession {
            repo,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn report(&self, phase: &str, message: &str) {
        if let Some(progress) = &self.progress {
            progress(phase, message);
        }
        tracing::debug!("{phase}: {message}");
    }

    /// Fetch from the peer serving `git-upload-pack` on `duplex`.
    pub async fn fetch<D: Duplex>(
        &self,
        duplex: D,
        options: FetchOptions,
    ) -> Result<FetchOutcome, GitError> {
        let mut link = PktLink::new(
            duplex,
            self.repo.config.protocol.read_timeout,
            self.cancel.clone(),
        );

        self.report("handshake", "requesting git-upload-pack");
        link.write_line(&format!("{}\n", ServiceType::UploadPack))
            .await?;

        let (advertised, server_caps) = read_advertisement(&mut link).await?;
        self.report("advertisement", &format!("{} refs", advertised.len()));

        // Map refspecs over the advertisement to find the tips we want.
        let mut targets: Vec<(GitRef, String)> = Vec::new();
        for reference in &advertised {
            for refspec in &options.refspecs {
                if let Some(local) = refspec.map(&reference.name) {
                    targets.push((reference.clone(), local));
                    break;
                }
            }
        }

        let mut wants: Vec<ObjectId> = Vec::new();
        for (reference, _) in &targets {
            if !self.repo.odb().has(&reference.id).await? && !wants.contains(&reference.id) {
                wants.push(reference.id);
            }
        }

        let mut outcome = FetchOutcome::default();
        if wants.is_empty() {
            self.report("negotiation", "already up to date");
            link.write_flush().await?;
            link.close().await?;
            outcome.updated = self.update_fetched_refs(&targets, &options).await?;
            return Ok(outcome);
        }

        let side_band = server_caps.contains(&Capability::SideBand64k);
        let mut caps = String::from("multi_ack_detailed ofs-delta thin-pack");
        if side_band {
            caps.push_str(" side-band-64k");
        }
        caps.push_str(&format!(" agent={}", self.repo.config.protocol.agent));

        for (index, want) in wants.iter().enumerate() {
            if index == 0 {
                link.write_line(&format!("want {want} {caps}\n")).await?;
            } else {
                link.write_line(&format!("want {want}\n")).await?;
            }
        }
        link.write_flush().await?;

        // Stream haves in recency order, batch by batch.
        let tips: Vec<ObjectId> = {
            let mut tips = Vec::new();
            for reference in self.repo.refs().list("refs/").await? {
                if let Some(id) = reference.id()
                    && self.repo.odb().has(&id).await?
                {
                    tips.push(id);
                }
            }
            tips
        };
        let haves = history::recent_commits(self.repo.odb(), &tips, 1024).await?;
        let batch_size = self.repo.config.protocol.negotiation_batch;

        let mut found_common = false;
        for batch in haves.chunks(batch_size) {
            self.cancel.check()?;
            for have in batch {
                link.write_line(&format!("have {have}\n")).await?;
            }
            link.write_flush().await?;

            // Per-batch response: ACK lines, then the NAK terminator.
            loop {
                let line = link.expect_data().await?;
                let text = String::from_utf8_lossy(&line);
                if text.starts_with("ACK") {
                    found_common = true;
                    continue;
                }
                if text.starts_with("NAK") {
                    break;
                }
            }
            if found_common {
                break;
            }
        }

        self.report("negotiation", "sending done");
        link.write_line("done\n").await?;
        // Final ACK/NAK.
        let _ = link.expect_data().await?;

        self.report("transfer", "receiving pack");
        let pack_bytes = if side_band {
            read_side_band_pack(&mut link, |message| {
                self.report("remote", message);
            })
            .await?
        } else {
            link.read_raw_to_end().await?
        };

        outcome.objects_imported = self.import_pack(&pack_bytes).await?;
        self.report(
            "import",
            &format!("{} objects imported", outcome.objects_imported),
        );

        outcome.updated = self.update_fetched_refs(&targets, &options).await?;
        link.close().await?;
        Ok(outcome)
    }

    /// Push to the peer serving `git-receive-pack` on `duplex`.
    pub async fn push<D: Duplex>(
        &self,
        duplex: D,
        options: PushOptions,
    ) -> Result<PushOutcome, GitError> {
        let mut link = PktLink::new(
            duplex,
            self.repo.config.protocol.read_timeout,
            self.cancel.clone(),
        );

        self.report("handshake", "requesting git-receive-pack");
        link.write_line(&format!("{}\n", ServiceType::ReceivePack))
            .await?;

        let (advertised, _server_caps) = read_advertisement(&mut link).await?;

        // Build update commands from the refspecs.
        struct Update {
            old: ObjectId,
            new: ObjectId,
            name: String,
        }
        let mut updates: Vec<Update> = Vec::new();
        for refspec in &options.refspecs {
            if refspec.src.is_empty() {
                // Deletion refspec `:<dst>`.
                let Some(remote) = advertised.iter().find(|r| r.name == refspec.dst) else {
                    continue;
                };
                updates.push(Update {
                    old: remote.id,
                    new: ObjectId::ZERO,
                    name: refspec.dst.clone(),
                });
                continue;
            }

            let local_id = self.repo.resolve_rev(&refspec.src).await?;
            let remote_name = if refspec.dst.contains('*') {
                return Err(GitError::Invalid(
                    "push refspec destinations may not be patterns".to_string(),
                ));
            } else {
                refspec.dst.clone()
            };
            let old = advertised
                .iter()
                .find(|r| r.name == remote_name)
                .map(|r| r.id)
                .unwrap_or(ObjectId::ZERO);
            if old == local_id {
                continue;
            }

            // Fast-forward validation is the client's job; `+` or --force
            // waives it.
            if !options.force && !refspec.force && !old.is_zero() {
                let known = self.repo.odb().has(&old).await?;
                if !known
                    || !history::validate_fast_forward(self.repo.odb(), old, local_id).await?
                {
                    return Err(GitError::Conflict(format!(
                        "non-fast-forward update to {remote_name} (fetch first)"
                    )));
                }
            }
            updates.push(Update {
                old,
                new: local_id,
                name: remote_name,
            });
        }

        let mut outcome = PushOutcome::default();
        if updates.is_empty() {
            self.report("push", "nothing to push");
            link.write_flush().await?;
            link.close().await?;
            outcome.unpack_ok = true;
            return Ok(outcome);
        }

        let caps = format!(
            "report-status delete-refs ofs-delta agent={}",
            self.repo.config.protocol.agent
        );
        for (index, update) in updates.iter().enumerate() {
            if index == 0 {
                link.write_packet(
                    format!("{} {} {}\0{caps}\n", update.old, update.new, update.name)
                        .as_bytes(),
                )
                .await?;
            } else {
                link.write_line(&format!(
                    "{} {} {}\n",
                    update.old, update.new, update.name
                ))
                .await?;
            }
        }
        link.write_flush().await?;

        // Objects the server is missing: reachable from the new tips, minus
        // what the advertisement proves it has.
        let wants: Vec<ObjectId> = updates
            .iter()
            .filter(|u| !u.new.is_zero())
            .map(|u| u.new)
            .collect();
        if !wants.is_empty() {
            let mut haves = Vec::new();
            for reference in &advertised {
                if self.repo.odb().has(&reference.id).await? {
                    haves.push(reference.id);
                }
            }
            let reachable =
                history::collect_reachable(self.repo.odb(), &wants, &haves, &self.cancel)
                    .await?;
            let mut entries = Vec::with_capacity(reachable.len());
            for (id, _) in &reachable {
                let (obj_type, data) = self.repo.odb().load(id).await?;
                entries.push(Entry {
                    obj_type,
                    data: data.to_vec(),
                    hash: *id,
                    chain_len: 0,
                });
            }
            self.report("transfer", &format!("sending {} objects", entries.len()));
            let (pack, _, _) =
                PackEncoder::encode_all(entries, self.repo.config.pack.delta_window).await?;
            link.write_raw(Bytes::from(pack)).await?;
        }
        link.close().await?;

        // Report-status.
        self.report("report", "awaiting status");
        loop {
            match link.read_packet().await.map_err(GitError::from)? {
                Packet::Data(mut line) => {
                    let verb = read_until_white_space(&mut line);
                    match verb.as_str() {
                        "unpack" => {
                            let status = read_until_white_space(&mut line);
                            outcome.unpack_ok = status == "ok";
                        }
                        "ok" => {
                            let name = read_until_white_space(&mut line);
                            outcome.results.push((name, None));
                        }
                        "ng" => {
                            let name = read_until_white_space(&mut line);
                            let reason =
                                String::from_utf8_lossy(&line).trim().to_string();
                            outcome.results.push((name, Some(reason)));
                        }
                        _ => {}
                    }
                }
                Packet::Flush | Packet::Eof => break,
                _ => {}
            }
        }
        Ok(outcome)
    }

    /// Decode and import a received pack, completing thin deltas from the
    /// local store.
    async fn import_pack(&self, pack_bytes: &[u8]) -> Result<usize, GitError> {
        if pack_bytes.is_empty() {
            return Ok(0);
        }
        let mut pack = Pack::new(&self.repo.config.pack);
        let mut entries: Vec<Entry> = Vec::new();
        let missing = pack.decode(&mut std::io::Cursor::new(pack_bytes), |entry, _| {
            entries.push(entry)
        })?;
        for base_id in missing {
            let (obj_type, data) = self.repo.odb().load(&base_id).await?;
            pack.resolve_external(base_id, obj_type, data.to_vec(), &mut |entry, _| {
                entries.push(entry)
            })?;
        }
        if !pack.is_fully_resolved() {
            return Err(GitError::CorruptPack(
                "thin pack references unknown bases".to_string(),
            ));
        }
        self.repo.import_entries(entries).await
    }

    /// Point the refspec-mapped local refs at the fetched tips.
    async fn update_fetched_refs(
        &self,
        targets: &[(GitRef, String)],
        options: &FetchOptions,
    ) -> Result<Vec<(String, ObjectId)>, GitError> {
        let mut updated = Vec::new();
        for (reference, local) in targets {
            if !self.repo.odb().has(&reference.id).await? {
                continue;
            }
            let current = self.repo.refs().resolve_id(local).await?;
            if current == Some(reference.id) {
                continue;
            }
            // Fast-forward check unless the refspec is force-marked.
            let force = options
                .refspecs
                .iter()
                .any(|r| r.force && r.map(&reference.name).is_some());
            if let Some(current) = current
                && !force
                && !history::validate_fast_forward(self.repo.odb(), current, reference.id)
                    .await?
            {
                tracing::warn!("skipping non-fast-forward update of {local}");
                continue;
            }
            let log = self
                .repo
                .log_context(format!("fetch: storing head {}", reference.name));
            self.repo
                .refs()
                .set(local, reference.id, Some(&log))
                .await?;
            updated.push((local.clone(), reference.id));
        }
        Ok(updated)
    }
}

/// Read the ref advertisement: lines until flush, capabilities after the NUL
/// on the first line.
async fn read_advertisement<D: Duplex>(
    link: &mut PktLink<D>,
) -> Result<(Vec<GitRef>, Vec<Capability>), GitError> {
    let mut refs = Vec::new();
    let mut caps = Vec::new();
    let mut first = true;
    loop {
        match link.read_packet().await.map_err(GitError::from)? {
            Packet::Flush | Packet::Eof => break,
            Packet::Data(line) => {
                let mut line = line;
                if first {
                    if let Some(position) = line.iter().position(|b| *b == 0) {
                        for cap in String::from_utf8_lossy(&line[position + 1..])
                            .split_whitespace()
                        {
                            if let Ok(capability) = cap.parse::<Capability>() {
                                caps.push(capability);
                            }
                        }
                        line = line.slice(..position);
                    }
                    first = false;
                }
                let mut line = line;
                let hex = read_until_white_space(&mut line);
                let name = read_until_white_space(&mut line);
                if name == "capabilities^{}" {
                    continue;
                }
                let Ok(id) = ObjectId::from_str(&hex) else {
                    continue;
                };
                if id.is_zero() {
                    continue;
                }
                refs.push(GitRef { name, id });
            }
            _ => {}
        }
    }
    Ok((refs, caps))
}

/// Pull pack bytes out of side-band frames, forwarding band-2 progress.
async fn read_side_band_pack<D: Duplex>(
    link: &mut PktLink<D>,
    mut on_progress: impl FnMut(&str),
) -> Result<Bytes, GitError> {
    let mut pack = Vec::new();
    loop {
        match link.read_packet().await.map_err(GitError::from)? {
            Packet::Data(frame) => {
                if frame.is_empty() {
                    continue;
                }
                match frame[0] {
                    1 => pack.extend_from_slice(&frame[1..]),
                    2 => on_progress(String::from_utf8_lossy(&frame[1..]).trim()),
                    3 => {
                        return Err(GitError::Protocol(ProtocolError::Internal(format!(
                            "remote error: {}",
                            String::from_utf8_lossy(&frame[1..]).trim()
                        ))));
                    }
                    other => {
                        return Err(GitError::Protocol(ProtocolError::invalid_request(
                            &format!("unknown side-band {other}"),
                        )));
                    }
                }
            }
            Packet::Flush | Packet::Eof => break,
            _ => {}
        }
    }
    Ok(Bytes::from(pack))
}

/// Run the server side of either service on a duplex.
pub async fn serve<D: Duplex>(
    repo: &Repository,
    duplex: D,
    cancel: CancelToken,
) -> Result<(), ProtocolError> {
    SmartServer::new(repo).serve(duplex, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The channel duplex delivers in order and half-closes cleanly.
    #[tokio::test]
    async fn channel_duplex_half_close() {
        let (mut a, mut b) = ChannelDuplex::pair();
        a.send(Bytes::from_static(b"one")).await.unwrap();
        a.send(Bytes::from_static(b"two")).await.unwrap();
        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap().as_ref(), b"one");
        assert_eq!(b.recv().await.unwrap().unwrap().as_ref(), b"two");
        assert!(b.recv().await.unwrap().is_none());

        // The other direction still works after a's half-close.
        b.send(Bytes::from_static(b"reply")).await.unwrap();
        assert_eq!(a.recv().await.unwrap().unwrap().as_ref(), b"reply");
    }
}
