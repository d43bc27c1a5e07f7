//! Implementation of the Git smart protocol state machine on the serving
//! side: capability advertisement, want/have negotiation for upload-pack,
//! and the update-command/pack/report-status exchange for receive-pack,
//! bridged onto any [`Duplex`].

use std::str::FromStr;

use bytes::Bytes;

use crate::{
    cancel::CancelToken,
    errors::GitError,
    hash::ObjectId,
    history,
    internal::pack::{Pack, PackEncoder, entry::Entry},
    repository::Repository,
};

use super::{
    link::{Packet, PktLink},
    types::{
        Capability, Duplex, ProtocolError, RECEIVE_CAP_LIST, RefCommand, SIDE_BAND_64K_PAYLOAD,
        ServiceType, SideBand, UPLOAD_CAP_LIST,
    },
    utils::read_until_white_space,
};

/// Smart protocol server bound to one repository.
pub struct SmartServer<'a> {
    repo: &'a Repository,
    capabilities: Vec<Capability>,
}

impl<'a> SmartServer<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        SmartServer {
            repo,
            capabilities: Vec::new(),
        }
    }

    /// Serve one session: read the service handshake, then run the matching
    /// protocol to completion.
    pub async fn serve<D: Duplex>(
        &mut self,
        duplex: D,
        cancel: CancelToken,
    ) -> Result<(), ProtocolError> {
        let mut link = PktLink::new(
            duplex,
            self.repo.config.protocol.read_timeout,
            cancel,
        );

        let mut handshake = link.expect_data().await?;
        let service = read_until_white_space(&mut handshake);
        let service = ServiceType::from_str(service.trim())?;
        tracing::debug!("serving {service}");

        match service {
            ServiceType::UploadPack => self.upload_pack(&mut link).await,
            ServiceType::ReceivePack => self.receive_pack(&mut link).await,
        }
    }

    /// Write the ref advertisement: every ref line, capabilities after a NUL
    /// on the first, flush at the end.
    async fn advertise_refs<D: Duplex>(
        &self,
        link: &mut PktLink<D>,
        service: ServiceType,
    ) -> Result<(), ProtocolError> {
        let cap_list = match service {
            ServiceType::UploadPack => UPLOAD_CAP_LIST,
            ServiceType::ReceivePack => RECEIVE_CAP_LIST,
        };
        let caps = format!("{cap_list} agent={}", self.repo.config.protocol.agent);

        let head = self.repo.head_id().await.map_err(ProtocolError::from)?;
        let refs = self
            .repo
            .refs()
            .list("refs/")
            .await
            .map_err(ProtocolError::from)?;

        let mut first_written = false;
        if let Some(head) = head {
            link.write_line(&format!("{head} HEAD\0{caps}\n")).await?;
            first_written = true;
        }
        for reference in &refs {
            let Some(id) = reference.id() else { continue };
            if first_written {
                link.write_line(&format!("{id} {}\n", reference.name()))
                    .await?;
            } else {
                link.write_line(&format!("{id} {}\0{caps}\n", reference.name()))
                    .await?;
                first_written = true;
            }
        }
        if !first_written {
            // Empty repository: advertise capabilities alone.
            link.write_line(&format!("{} capabilities^{{}}\0{caps}\n", ObjectId::ZERO))
                .await?;
        }
        link.write_flush().await
    }

    /// upload-pack: advertisement, want/have negotiation, pack stream.
    async fn upload_pack<D: Duplex>(&mut self, link: &mut PktLink<D>) -> Result<(), ProtocolError> {
        self.advertise_refs(link, ServiceType::UploadPack).await?;

        // Wants, capabilities on the first line.
        let mut wants: Vec<ObjectId> = Vec::new();
        loop {
            match link.read_packet().await? {
                Packet::Flush => break,
                Packet::Eof => return Ok(()), // client hung up wanting nothing
                Packet::Data(mut line) => {
                    let verb = read_until_white_space(&mut line);
                    match verb.as_str() {
                        "want" => {
                            let hex = read_until_white_space(&mut line);
                            let id = ObjectId::from_str(&hex).map_err(|e| {
                                ProtocolError::invalid_request(&e.to_string())
                            })?;
                            if wants.is_empty() {
                                self.parse_capabilities(&String::from_utf8_lossy(&line));
                            }
                            wants.push(id);
                        }
                        other => {
                            tracing::warn!("Unknown upload-pack command: {}", other);
                        }
                    }
                }
                other => {
                    return Err(ProtocolError::invalid_request(&format!(
                        "unexpected {other:?} during want phase"
                    )));
                }
            }
        }
        if wants.is_empty() {
            return Ok(());
        }

        // Haves arrive in flush-bounded batches until `done`.
        let mut common: Vec<ObjectId> = Vec::new();
        'negotiation: loop {
            loop {
                match link.read_packet().await? {
                    Packet::Flush => {
                        // multi_ack_detailed: each batch response terminates
                        // with a NAK until the final ACK after `done`.
                        link.write_line("NAK\n").await?;
                        break;
                    }
                    Packet::Eof => return Ok(()),
                    Packet::Data(mut line) => {
                        let verb = read_until_white_space(&mut line);
                        match verb.as_str() {
                            "have" => {
                                let hex = read_until_white_space(&mut line);
                                let Ok(id) = ObjectId::from_str(&hex) else {
                                    continue;
                                };
                                if self
                                    .repo
                                    .odb()
                                    .has(&id)
                                    .await
                                    .map_err(ProtocolError::from)?
                                {
                                    common.push(id);
                                    link.write_line(&format!("ACK {id} common\n")).await?;
                                }
                            }
                            "done" => break 'negotiation,
                            other => {
                                tracing::warn!("Unknown negotiation verb: {}", other);
                            }
                        }
                    }
                    other => {
                        return Err(ProtocolError::invalid_request(&format!(
                            "unexpected {other:?} during negotiation"
                        )));
                    }
                }
            }
        }

        match common.last() {
            Some(last) => link.write_line(&format!("ACK {last}\n")).await?,
            None => link.write_line("NAK\n").await?,
        }

        // Everything reachable from the wants, minus the common history.
        let cancel = CancelToken::new();
        let reachable =
            history::collect_reachable(self.repo.odb(), &wants, &common, &cancel)
                .await
                .map_err(ProtocolError::from)?;
        let mut entries = Vec::with_capacity(reachable.len());
        for (id, _) in &reachable {
            let (obj_type, data) = self.repo.odb().load(id).await.map_err(ProtocolError::from)?;
            entries.push(Entry {
                obj_type,
                data: data.to_vec(),
                hash: *id,
                chain_len: 0,
            });
        }
        let count = entries.len();
        let (pack, _, _) =
            PackEncoder::encode_all(entries, self.repo.config.pack.delta_window)
                .await
                .map_err(ProtocolError::from)?;
        tracing::debug!("upload-pack: sending {count} objects, {} bytes", pack.len());

        if self.capabilities.contains(&Capability::SideBand64k) {
            let mut offset = 0;
            while offset < pack.len() {
                let end = (offset + SIDE_BAND_64K_PAYLOAD).min(pack.len());
                let mut frame = Vec::with_capacity(end - offset + 1);
                frame.push(SideBand::PackfileData.value());
                frame.extend_from_slice(&pack[offset..end]);
                link.write_packet(&frame).await?;
                offset = end;
            }
            link.write_flush().await?;
        } else {
            link.write_raw(Bytes::from(pack)).await?;
        }
        link.close().await
    }

    /// receive-pack: advertisement, update commands, pack import, report.
    async fn receive_pack<D: Duplex>(
        &mut self,
        link: &mut PktLink<D>,
    ) -> Result<(), ProtocolError> {
        self.advertise_refs(link, ServiceType::ReceivePack).await?;

        let mut commands: Vec<RefCommand> = Vec::new();
        loop {
            match link.read_packet().await? {
                Packet::Flush => break,
                Packet::Eof => return Ok(()),
                Packet::Data(mut line) => {
                    if commands.is_empty()
                        && let Some(position) = line.iter().position(|b| *b == 0)
                    {
                        let caps = String::from_utf8_lossy(&line[position + 1..]).to_string();
                        self.parse_capabilities(&caps);
                        line = line.slice(..position);
                    }
                    let mut line = line;
                    let old = read_until_white_space(&mut line);
                    let new = read_until_white_space(&mut line);
                    let name = read_until_white_space(&mut line);
                    let (Ok(old_id), Ok(new_id)) =
                        (ObjectId::from_str(&old), ObjectId::from_str(&new))
                    else {
                        return Err(ProtocolError::invalid_request(
                            "malformed update command",
                        ));
                    };
                    commands.push(RefCommand::new(old_id, new_id, name));
                }
                other => {
                    return Err(ProtocolError::invalid_request(&format!(
                        "unexpected {other:?} during command phase"
                    )));
                }
            }
        }
        if commands.is_empty() {
            return Ok(());
        }

        // A pack follows unless every command is a deletion.
        let mut unpack_error: Option<String> = None;
        if commands.iter().any(|command| !command.is_delete()) {
            let pack_bytes = link.read_raw_to_end().await?;
            if !pack_bytes.is_empty() {
                match self.unpack(&pack_bytes).await {
                    Ok(count) => tracing::debug!("receive-pack: unpacked {count} objects"),
                    Err(e) => {
                        tracing::error!("receive-pack: unpack failed: {e}");
                        unpack_error = Some(e.to_string());
                    }
                }
            }
        }

        match &unpack_error {
            None => link.write_line("unpack ok\n").await?,
            Some(reason) => {
                link.write_line(&format!("unpack {reason}\n")).await?;
            }
        }

        for command in &mut commands {
            if unpack_error.is_some() {
                command.failed("unpack failed".to_string());
            } else if let Err(reason) = self.apply_command(command).await {
                command.failed(reason);
            } else {
                command.success();
            }
            link.write_line(&format!("{}\n", command.report_line())).await?;
        }
        link.write_flush().await?;
        link.close().await
    }

    /// Decode the received pack into loose objects, completing thin packs
    /// from the local store.
    async fn unpack(&self, pack_bytes: &[u8]) -> Result<usize, GitError> {
        let mut pack = Pack::new(&self.repo.config.pack);
        let mut entries: Vec<Entry> = Vec::new();
        let missing = pack.decode(
            &mut std::io::Cursor::new(pack_bytes),
            |entry, _offset| entries.push(entry),
        )?;

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

    /// Validate and apply one update command; errors become `ng` reasons.
    async fn apply_command(&self, command: &RefCommand) -> Result<(), String> {
        if !command.ref_name.starts_with("refs/") {
            return Err("funny refname".to_string());
        }

        if command.is_delete() {
            if !self.capabilities.contains(&Capability::DeleteRefs) {
                return Err("deletion not requested".to_string());
            }
            let current = self
                .repo
                .refs()
                .resolve_id(&command.ref_name)
                .await
                .map_err(|e| e.to_string())?;
            if current != Some(command.old_id) {
                return Err("stale info".to_string());
            }
            self.repo
                .refs()
                .delete(&command.ref_name)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(());
        }

        if !self
            .repo
            .odb()
            .has(&command.new_id)
            .await
            .map_err(|e| e.to_string())?
        {
            return Err(format!("missing necessary objects {}", command.new_id));
        }

        let expected = if command.is_create() {
            None
        } else {
            Some(command.old_id)
        };
        let log = self.repo.log_context(format!(
            "push: update {} to {}",
            command.ref_name, command.new_id
        ));
        let outcome = self
            .repo
            .refs()
            .compare_and_swap(&command.ref_name, expected, command.new_id, Some(&log))
            .await
            .map_err(|e| e.to_string())?;
        if !outcome.swapped {
            return Err("fetch first".to_string());
        }
        Ok(())
    }

    fn parse_capabilities(&mut self, cap_str: &str) {
        for cap in cap_str.split_whitespace() {
            if let Ok(capability) = cap.parse::<Capability>() {
                self.capabilities.push(capability);
            }
        }
    }
}
