use super::{payload, tolerate, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::NetworkConfig;
use jumppad_schema::kinds::Network;
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info};

/// Bridge networks, named after the resource.
#[derive(Debug, Default)]
pub struct NetworkProvider;

/// Parse `a.b.c.d/n` (or an IPv6 prefix) into address and prefix length.
pub(crate) fn parse_cidr(subnet: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = subnet.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

impl Provider for NetworkProvider {
    fn kind(&self) -> &'static str {
        "network"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let net: Network = payload(resource)?;
        let name = resource.info().name.clone();
        info!(id = %resource.id(), "creating network {name}");
        if parse_cidr(&net.subnet).is_none() {
            return Err(ProviderError::invalid(format!(
                "network {name} has invalid subnet '{}'",
                net.subnet
            )));
        }

        if let Some(existing) = ctx.clients.networks.find_network(&name)? {
            if existing.subnet == net.subnet {
                debug!("adopting existing network {name} ({})", existing.id);
                return Ok(());
            }
            return Err(ProviderError::new(
                crate::ProviderErrorKind::AlreadyExists,
                format!(
                    "a network named {name} already exists with subnet {}, wanted {}",
                    existing.subnet, net.subnet
                ),
            ));
        }

        let labels = BTreeMap::from([
            ("created_by".to_owned(), "jumppad".to_owned()),
            ("id".to_owned(), resource.id().to_string()),
        ]);
        ctx.clients.networks.create_network(&NetworkConfig {
            name,
            subnet: net.subnet,
            enable_ipv6: net.enable_ipv6,
            labels,
        })?;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let name = resource.info().name.clone();
        info!(id = %resource.id(), "destroying network {name}");
        let Some(existing) = ctx.clients.networks.find_network(&name)? else {
            return Ok(());
        };
        for container in &existing.containers {
            debug!("detaching {container} from network {name}");
            tolerate(
                ctx.clients.networks.detach(&name, container).map_err(Into::into),
                &format!("detach {container} from {name}"),
                force,
            )?;
        }
        tolerate(
            ctx.clients.networks.remove_network(&name).map_err(Into::into),
            &format!("remove network {name}"),
            force,
        )
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(ctx
            .clients
            .networks
            .find_network(&resource.info().name)?
            .map(|n| vec![n.id])
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::Harness;
    use crate::ProviderErrorKind;

    fn network(name: &str, subnet: &str) -> Resource {
        Resource::new(
            name,
            Network {
                subnet: subnet.to_owned(),
                ..Network::default()
            },
        )
    }

    #[test]
    fn parse_cidr_accepts_v4_and_v6() {
        assert!(parse_cidr("10.5.0.0/16").is_some());
        assert!(parse_cidr("fd00::/64").is_some());
        assert!(parse_cidr("10.5.0.0").is_none());
        assert!(parse_cidr("10.5.0.0/33").is_none());
    }

    #[test]
    fn create_then_adopt() {
        let h = Harness::new();
        let mut r = network("n1", "10.5.0.0/16");
        NetworkProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(h.mock.network_subnet("n1").as_deref(), Some("10.5.0.0/16"));
        NetworkProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(h.mock.count("create_network"), 1);
        assert_eq!(NetworkProvider.lookup(&r, &h.ctx()).unwrap().len(), 1);
    }

    #[test]
    fn different_subnet_is_rejected() {
        let h = Harness::new();
        NetworkProvider
            .create(&mut network("n1", "10.5.0.0/16"), &h.ctx())
            .unwrap();
        let err = NetworkProvider
            .create(&mut network("n1", "10.6.0.0/16"), &h.ctx())
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::AlreadyExists);
    }

    #[test]
    fn invalid_subnet() {
        let h = Harness::new();
        let err = NetworkProvider
            .create(&mut network("n1", "nope"), &h.ctx())
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidArgument);
        assert_eq!(h.mock.count("create_network"), 0);
    }

    #[test]
    fn destroy_detaches_and_tolerates_missing() {
        let h = Harness::new();
        let mut r = network("n1", "10.5.0.0/16");
        NetworkProvider.create(&mut r, &h.ctx()).unwrap();
        let id = h
            .clients
            .containers
            .create_container(&jumppad_runtime::ContainerConfig {
                name: "web".to_owned(),
                image: "alpine:3".to_owned(),
                ..Default::default()
            })
            .unwrap();
        h.clients
            .networks
            .attach("n1", &id, &jumppad_runtime::NetworkAttachment::default())
            .unwrap();

        NetworkProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert!(h.mock.network_names().is_empty());
        assert_eq!(h.mock.count("detach"), 1);
        NetworkProvider.destroy(&mut r, &h.ctx(), false).unwrap();
    }
}
