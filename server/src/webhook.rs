use std::str::FromStr;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use solana_sdk::pubkey::Pubkey;
use types::ChainEvent;

use crate::{error::Error, registry::Registry, utils};

/// Handler for membership events posted by the contract listener.
pub struct Handle {
    /// The auth token expected on every posted event.
    auth_token: String,
}

impl Handle {
    pub fn new(auth_token: String) -> Self {
        Self { auth_token }
    }

    pub async fn chain_event(
        handle: web::Data<Handle>,
        registry: web::Data<Registry>,
        req: HttpRequest,
        bytes: web::Bytes,
    ) -> impl Responder {
        let handle = handle.into_inner();
        match handle
            .handle_chain_event(registry.as_ref(), &req, &bytes)
            .await
        {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(err) => {
                log::error!("{:?}", err);
                let http_response: HttpResponse = err.into();
                http_response
            }
        }
    }

    /// Maps the event onto registration or renewal.
    async fn handle_chain_event(
        &self,
        registry: &Registry,
        req: &HttpRequest,
        bytes: &web::Bytes,
    ) -> Result<(), Error> {
        self.auth(req)?;
        let event = serde_json::from_slice::<ChainEvent>(bytes)?;
        log::info!("chain event: {:?}", event);
        let now = utils::unix_timestamp();
        match event {
            ChainEvent::MemberActivated {
                user,
                referrer,
                position,
            } => {
                let wallet = Pubkey::from_str(user.trim())?;
                let referrer = parse_referrer(referrer)?;
                registry
                    .register_member(&wallet, referrer.as_ref(), position, now)
                    .await?;
            }
            ChainEvent::MembershipRenewed { user } => {
                let wallet = Pubkey::from_str(user.trim())?;
                registry.renew_member(&wallet, now).await?;
            }
        }
        Ok(())
    }

    /// parse and validate the auth header
    fn auth(&self, req: &HttpRequest) -> Result<(), Error> {
        let header = req
            .headers()
            .get("Authorization")
            .ok_or(Error::Unauthorized)?;
        let header = header.to_str()?;
        if header.ne(self.auth_token.as_str()) {
            log::warn!("invalid auth header on chain event");
            return Err(Error::Unauthorized);
        }
        Ok(())
    }
}

/// The contract reports the zero key when there is no referrer.
fn parse_referrer(referrer: Option<String>) -> Result<Option<Pubkey>, Error> {
    match referrer.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(referrer) => {
            let referrer = Pubkey::from_str(referrer)?;
            if referrer.eq(&Pubkey::default()) {
                Ok(None)
            } else {
                Ok(Some(referrer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;
    use types::{Branch, Member};

    use super::*;
    use crate::{
        consts::MEMBERSHIP_PERIOD,
        memory::MemoryStore,
        rewards::{Rewards, TierTable},
        store::Store,
    };

    #[actix_web::test]
    async fn zero_referrer_means_none() {
        assert_eq!(parse_referrer(None).unwrap(), None);
        assert_eq!(
            parse_referrer(Some(Pubkey::default().to_string())).unwrap(),
            None
        );
        let referrer = Pubkey::new_unique();
        assert_eq!(
            parse_referrer(Some(referrer.to_string())).unwrap(),
            Some(referrer)
        );
        assert!(parse_referrer(Some("nope!".to_string())).is_err());
    }

    #[actix_web::test]
    async fn events_register_and_renew() {
        let store = Arc::new(MemoryStore::new());
        let root = Pubkey::new_unique();
        store
            .insert_root(&Member::new(root, None, None, 0, i64::MAX))
            .await
            .unwrap();
        let rewards = Arc::new(Rewards::new(store.clone(), TierTable::default()));
        let registry = Registry::new(
            store.clone(),
            rewards,
            root,
            "https://billionup.ai".to_string(),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .app_data(web::Data::new(Handle::new("secret".to_string())))
                .route("/events", web::post().to(Handle::chain_event)),
        )
        .await;

        let user = Pubkey::new_unique();
        let activated = json!({
            "event": "MemberActivated",
            "user": user.to_string(),
            "referrer": Pubkey::default().to_string(),
            "position": "right",
        });
        let req = test::TestRequest::post()
            .uri("/events")
            .set_json(&activated)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(store.get_member(&user).await.unwrap().is_none());

        let req = test::TestRequest::post()
            .uri("/events")
            .insert_header(("Authorization", "secret"))
            .set_json(&activated)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let member = store.get_member(&user).await.unwrap().unwrap();
        assert_eq!(member.sponsor, Some(root));
        assert_eq!(member.branch, Some(Branch::Right));

        let req = test::TestRequest::post()
            .uri("/events")
            .insert_header(("Authorization", "secret"))
            .set_json(json!({ "event": "MembershipRenewed", "user": user.to_string() }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let renewed = store.get_member(&user).await.unwrap().unwrap();
        assert!(renewed.expiry_at >= member.expiry_at);
        assert!(renewed.expiry_at <= utils::unix_timestamp() + MEMBERSHIP_PERIOD);
    }
}
