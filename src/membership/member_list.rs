use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use super::Member;
use super::MemberDiscovery;
use crate::Result;

/// Default discovery: members learned from membership events, then seeds
#[derive(Debug)]
pub struct MemberList {
    seeds: Vec<String>,
    members: RwLock<Vec<Member>>,
}

impl MemberList {
    pub fn new(seeds: Vec<String>) -> Self {
        Self {
            seeds,
            members: RwLock::new(Vec::new()),
        }
    }

    /// Records a member; a member at an already known address replaces the old identity.
    ///
    /// Returns `true` if the member was not known before.
    pub fn member_added(
        &self,
        member: Member,
    ) -> bool {
        let mut members = self.members.write();
        if members.iter().any(|m| m.uuid == member.uuid) {
            return false;
        }
        if let Some(pos) = members.iter().position(|m| m.address == member.address) {
            let replaced = members.remove(pos);
            info!(old = %replaced, new = %member, "member replaced at same address");
        } else {
            info!(%member, "member added");
        }
        members.push(member);
        true
    }

    pub fn member_removed(
        &self,
        uuid: &Uuid,
    ) -> Option<Member> {
        let mut members = self.members.write();
        let pos = members.iter().position(|m| &m.uuid == uuid)?;
        let member = members.remove(pos);
        info!(%member, "member removed");
        Some(member)
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.read().clone()
    }

    pub fn member(
        &self,
        uuid: &Uuid,
    ) -> Option<Member> {
        self.members.read().iter().find(|m| &m.uuid == uuid).cloned()
    }
}

#[async_trait]
impl MemberDiscovery for MemberList {
    async fn addresses(&self) -> Result<Vec<String>> {
        let mut addresses: Vec<String> =
            self.members.read().iter().map(|m| m.address.clone()).collect();
        for seed in &self.seeds {
            if !addresses.contains(seed) {
                addresses.push(seed.clone());
            }
        }
        debug!(?addresses, "discovered member addresses");
        Ok(addresses)
    }
}
