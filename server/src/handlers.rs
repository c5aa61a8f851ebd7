use std::str::FromStr;

use actix_web::{web, HttpResponse, Responder};
use solana_sdk::pubkey::Pubkey;
use types::{
    GetMemberPayload, RegisterPayload, RegistrationResponse, RenewPayload, StatusMessage,
};

use crate::{
    error::Error,
    registry::{Registration, Registry, RewardOutcome},
    utils,
};

pub async fn register(
    registry: web::Data<Registry>,
    payload: web::Json<RegisterPayload>,
) -> impl Responder {
    match register_new_member(registry.as_ref(), payload.into_inner()).await {
        Ok(res) => HttpResponse::Ok().json(&res),
        Err(err) => {
            log::error!("{:?}", err);
            let http_response: HttpResponse = err.into();
            http_response
        }
    }
}

pub async fn renew(
    registry: web::Data<Registry>,
    payload: web::Json<RenewPayload>,
) -> impl Responder {
    match renew_member(registry.as_ref(), payload.into_inner()).await {
        Ok(res) => HttpResponse::Ok().json(&res),
        Err(err) => {
            log::error!("{:?}", err);
            let http_response: HttpResponse = err.into();
            http_response
        }
    }
}

pub async fn member_status(
    registry: web::Data<Registry>,
    path: web::Path<GetMemberPayload>,
) -> impl Responder {
    let wallet = match Pubkey::from_str(path.into_inner().wallet.trim()) {
        Ok(wallet) => wallet,
        Err(err) => {
            log::warn!("status query for invalid wallet: {:?}", err);
            return HttpResponse::BadRequest().body("invalid wallet address");
        }
    };
    match registry
        .member_status(&wallet, utils::unix_timestamp())
        .await
    {
        Ok(status) => HttpResponse::Ok().json(&status),
        Err(err) => {
            log::error!("{:?}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

pub async fn register_new_member(
    registry: &Registry,
    payload: RegisterPayload,
) -> Result<RegistrationResponse, Error> {
    let wallet = Pubkey::from_str(payload.wallet_address.trim())?;
    let referrer = match payload.referrer_wallet.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(referrer) => Some(Pubkey::from_str(referrer)?),
    };
    let Registration { placement, rewards } = registry
        .register_member(
            &wallet,
            referrer.as_ref(),
            payload.position,
            utils::unix_timestamp(),
        )
        .await?;
    let message = match rewards {
        RewardOutcome::Awarded(_) => "member registered".to_string(),
        RewardOutcome::Failed(_) => {
            "member registered, rewards will be evaluated on the next event".to_string()
        }
    };
    Ok(RegistrationResponse {
        status: "success".to_string(),
        message,
        sponsor: placement.sponsor.to_string(),
        position: placement.branch,
    })
}

pub async fn renew_member(
    registry: &Registry,
    payload: RenewPayload,
) -> Result<StatusMessage, Error> {
    let wallet = Pubkey::from_str(payload.wallet_address.trim())?;
    let expiry_at = registry
        .renew_member(&wallet, utils::unix_timestamp())
        .await?;
    Ok(StatusMessage {
        status: "success".to_string(),
        message: format!("membership renewed until {}", expiry_at),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};
    use types::{Branch, Member, MemberStatusResponse, RegistrationStatus};

    use super::*;
    use crate::{
        consts::MEMBERSHIP_PERIOD,
        memory::MemoryStore,
        rewards::{Rewards, TierTable},
        store::Store,
    };

    async fn registry() -> (web::Data<Registry>, Pubkey) {
        let store = Arc::new(MemoryStore::new());
        let root = Pubkey::new_unique();
        store
            .insert_root(&Member::new(
                root,
                None,
                None,
                0,
                utils::unix_timestamp() + MEMBERSHIP_PERIOD,
            ))
            .await
            .unwrap();
        let rewards = Arc::new(Rewards::new(store.clone(), TierTable::default()));
        let registry = Registry::new(store, rewards, root, "https://billionup.ai".to_string());
        (web::Data::new(registry), root)
    }

    #[actix_web::test]
    async fn register_then_query_status() {
        let (registry, root) = registry().await;
        let app = test::init_service(
            App::new()
                .app_data(registry)
                .route("/members/register", web::post().to(register))
                .route("/members/{wallet}/status", web::get().to(member_status)),
        )
        .await;

        let wallet = Pubkey::new_unique();
        let req = test::TestRequest::post()
            .uri("/members/register")
            .set_json(RegisterPayload {
                wallet_address: wallet.to_string(),
                referrer_wallet: None,
                position: Branch::Center,
            })
            .to_request();
        let res: RegistrationResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(res.sponsor, root.to_string());
        assert_eq!(res.position, Branch::Center);

        let req = test::TestRequest::post()
            .uri("/members/register")
            .set_json(RegisterPayload {
                wallet_address: wallet.to_string(),
                referrer_wallet: Some(root.to_string()),
                position: Branch::Left,
            })
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/members/{}/status", wallet))
            .to_request();
        let status: MemberStatusResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.status, RegistrationStatus::Active);

        let req = test::TestRequest::get()
            .uri(&format!("/members/{}/status", Pubkey::new_unique()))
            .to_request();
        let status: MemberStatusResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.status, RegistrationStatus::NotRegistered);

        let req = test::TestRequest::get()
            .uri("/members/not-a-wallet/status")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn renew_unknown_is_not_found() {
        let (registry, _root) = registry().await;
        let app = test::init_service(
            App::new()
                .app_data(registry)
                .route("/members/renew", web::post().to(renew)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/members/renew")
            .set_json(RenewPayload {
                wallet_address: Pubkey::new_unique().to_string(),
            })
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
