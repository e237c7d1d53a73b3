//! Session gateway: typed requests in, typed responses out.
//!
//! Each request is decoded from a JSON object whose `type` field names the
//! operation (`"vessel:join"`, `"cargo:assign"`, ...). Payloads are checked
//! once here; the engine methods behind them enforce state rules.

use crate::finance::InsuranceRequest;
use crate::logistics::{CargoRequest, HoldReport};
use crate::market::{LeaseTerms, SaleTerms};
use crate::{Engine, GatewayError, Result};
use fleet_core::{
    require_id, CargoLot, EconomyProfile, EconomyTransaction, InsurancePolicy, Lease, Loan,
    OperatorId, PassengerContract, PhysicalState, PortId, Sale, SpaceId, Station, VesselId,
    VesselProjection,
};
use fleet_econ::PortCongestion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// An authenticated connection. Issued by the auth layer, trusted here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub operator_id: OperatorId,
    pub display_name: String,
    pub space_id: SpaceId,
    pub admin: bool,
}

impl Session {
    pub fn new(operator_id: OperatorId, display_name: &str, space_id: SpaceId) -> Self {
        Self {
            operator_id,
            display_name: display_name.to_string(),
            space_id,
            admin: false,
        }
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }
}

fn default_limit() -> i64 {
    20
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "vessel:join", rename_all = "camelCase")]
    Join {
        #[serde(default)]
        vessel_id: Option<VesselId>,
    },
    #[serde(rename = "vessel:leave")]
    Leave,
    #[serde(rename = "vessel:create")]
    Create,
    #[serde(rename = "vessel:store", rename_all = "camelCase")]
    Store { vessel_id: VesselId },
    #[serde(rename = "vessel:activate", rename_all = "camelCase")]
    Activate { vessel_id: VesselId },
    #[serde(rename = "vessel:station", rename_all = "camelCase")]
    Station {
        vessel_id: VesselId,
        station: Station,
        claim: bool,
    },
    #[serde(rename = "vessel:state", rename_all = "camelCase")]
    State {
        vessel_id: VesselId,
        state: PhysicalState,
    },
    #[serde(rename = "vessel:get", rename_all = "camelCase")]
    Get { vessel_id: VesselId },
    #[serde(rename = "vessel:list")]
    List,
    #[serde(rename = "vessel:lease:create")]
    LeaseCreate(LeaseTerms),
    #[serde(rename = "vessel:lease:accept", rename_all = "camelCase")]
    LeaseAccept { lease_id: String },
    #[serde(rename = "vessel:lease:end", rename_all = "camelCase")]
    LeaseEnd { lease_id: String },
    #[serde(rename = "vessel:lease:list")]
    LeaseList,
    #[serde(rename = "vessel:sale:create")]
    SaleCreate(SaleTerms),
    #[serde(rename = "vessel:sale:buy", rename_all = "camelCase")]
    SaleBuy { sale_id: String },
    #[serde(rename = "vessel:sale:cancel", rename_all = "camelCase")]
    SaleCancel { sale_id: String },
    #[serde(rename = "vessel:sale:list")]
    SaleList,
    #[serde(rename = "cargo:create")]
    CargoCreate(CargoRequest),
    #[serde(rename = "cargo:assign", rename_all = "camelCase")]
    CargoAssign { cargo_id: String, vessel_id: VesselId },
    #[serde(rename = "cargo:release", rename_all = "camelCase")]
    CargoRelease { cargo_id: String },
    #[serde(rename = "cargo:list", rename_all = "camelCase")]
    CargoList { port_id: PortId },
    #[serde(rename = "cargo:hold", rename_all = "camelCase")]
    CargoHold { vessel_id: VesselId },
    #[serde(rename = "passengers:accept", rename_all = "camelCase")]
    PassengersAccept {
        contract_id: String,
        vessel_id: VesselId,
    },
    #[serde(rename = "passengers:list", rename_all = "camelCase")]
    PassengersList { port_id: PortId },
    #[serde(rename = "economy:profile")]
    Profile,
    #[serde(rename = "economy:transactions")]
    Transactions {
        #[serde(default = "default_limit")]
        limit: i64,
    },
    #[serde(rename = "ports:congestion")]
    Congestion,
    #[serde(rename = "loan:request", rename_all = "camelCase")]
    LoanRequest {
        amount: i64,
        #[serde(default)]
        term_days: Option<i64>,
    },
    #[serde(rename = "loan:repay", rename_all = "camelCase")]
    LoanRepay { loan_id: String, amount: i64 },
    #[serde(rename = "loan:list")]
    LoanList,
    #[serde(rename = "insurance:buy")]
    InsuranceBuy(InsuranceRequest),
    #[serde(rename = "insurance:cancel", rename_all = "camelCase")]
    InsuranceCancel { policy_id: String },
    #[serde(rename = "insurance:list", rename_all = "camelCase")]
    InsuranceList { vessel_id: VesselId },
}

impl Request {
    /// Shape checks that need no state: ids present, limits sane.
    pub fn validate(&self) -> Result<()> {
        match self {
            Request::Join {
                vessel_id: Some(id),
            }
            | Request::Store { vessel_id: id }
            | Request::Activate { vessel_id: id }
            | Request::Station { vessel_id: id, .. }
            | Request::State { vessel_id: id, .. }
            | Request::Get { vessel_id: id }
            | Request::CargoHold { vessel_id: id }
            | Request::InsuranceList { vessel_id: id } => require_id(id.as_str(), "vesselId")?,
            Request::LeaseCreate(terms) => require_id(terms.vessel_id.as_str(), "vesselId")?,
            Request::SaleCreate(terms) => require_id(terms.vessel_id.as_str(), "vesselId")?,
            Request::InsuranceBuy(req) => require_id(req.vessel_id.as_str(), "vesselId")?,
            Request::LeaseAccept { lease_id } | Request::LeaseEnd { lease_id } => {
                require_id(lease_id, "leaseId")?
            }
            Request::SaleBuy { sale_id } | Request::SaleCancel { sale_id } => {
                require_id(sale_id, "saleId")?
            }
            Request::CargoAssign {
                cargo_id,
                vessel_id,
            } => {
                require_id(cargo_id, "cargoId")?;
                require_id(vessel_id.as_str(), "vesselId")?;
            }
            Request::CargoRelease { cargo_id } => require_id(cargo_id, "cargoId")?,
            Request::PassengersAccept {
                contract_id,
                vessel_id,
            } => {
                require_id(contract_id, "contractId")?;
                require_id(vessel_id.as_str(), "vesselId")?;
            }
            Request::CargoList { port_id } | Request::PassengersList { port_id } => {
                require_id(port_id.as_str(), "portId")?
            }
            Request::Transactions { limit } if !(1..=500).contains(limit) => {
                return Err(GatewayError::validation("limit must be within 1..=500"))
            }
            Request::LoanRepay { loan_id, .. } => require_id(loan_id, "loanId")?,
            Request::InsuranceCancel { policy_id } => require_id(policy_id, "policyId")?,
            _ => {}
        }
        Ok(())
    }

    /// Wire name of the operation, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Join { .. } => "vessel:join",
            Request::Leave => "vessel:leave",
            Request::Create => "vessel:create",
            Request::Store { .. } => "vessel:store",
            Request::Activate { .. } => "vessel:activate",
            Request::Station { .. } => "vessel:station",
            Request::State { .. } => "vessel:state",
            Request::Get { .. } => "vessel:get",
            Request::List => "vessel:list",
            Request::LeaseCreate(_) => "vessel:lease:create",
            Request::LeaseAccept { .. } => "vessel:lease:accept",
            Request::LeaseEnd { .. } => "vessel:lease:end",
            Request::LeaseList => "vessel:lease:list",
            Request::SaleCreate(_) => "vessel:sale:create",
            Request::SaleBuy { .. } => "vessel:sale:buy",
            Request::SaleCancel { .. } => "vessel:sale:cancel",
            Request::SaleList => "vessel:sale:list",
            Request::CargoCreate(_) => "cargo:create",
            Request::CargoAssign { .. } => "cargo:assign",
            Request::CargoRelease { .. } => "cargo:release",
            Request::CargoList { .. } => "cargo:list",
            Request::CargoHold { .. } => "cargo:hold",
            Request::PassengersAccept { .. } => "passengers:accept",
            Request::PassengersList { .. } => "passengers:list",
            Request::Profile => "economy:profile",
            Request::Transactions { .. } => "economy:transactions",
            Request::Congestion => "ports:congestion",
            Request::LoanRequest { .. } => "loan:request",
            Request::LoanRepay { .. } => "loan:repay",
            Request::LoanList => "loan:list",
            Request::InsuranceBuy(_) => "insurance:buy",
            Request::InsuranceCancel { .. } => "insurance:cancel",
            Request::InsuranceList { .. } => "insurance:list",
        }
    }
}

/// Decode one wire message into its optional `requestId` and the request.
pub fn parse_request(line: &str) -> serde_json::Result<(Option<String>, Request)> {
    let value: Value = serde_json::from_str(line)?;
    let request_id = value
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let request = serde_json::from_value(value)?;
    Ok((request_id, request))
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Response {
    Vessel(VesselProjection),
    Left(Option<VesselProjection>),
    Vessels(Vec<VesselProjection>),
    Lease(Lease),
    Leases(Vec<Lease>),
    Sale(Sale),
    Sales(Vec<Sale>),
    Cargo(CargoLot),
    CargoList(Vec<CargoLot>),
    Hold(HoldReport),
    Passengers(PassengerContract),
    PassengerList(Vec<PassengerContract>),
    Profile(EconomyProfile),
    Transactions(Vec<EconomyTransaction>),
    Congestion(Vec<PortCongestion>),
    Loan(Loan),
    Loans(Vec<Loan>),
    Policy(InsurancePolicy),
    Policies(Vec<InsurancePolicy>),
    Done,
}

#[derive(Debug, Serialize)]
pub struct ReplyError {
    pub kind: &'static str,
    pub message: String,
}

/// Acknowledgement sent to the requesting session only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    pub fn new(request_id: Option<String>, result: Result<Response>) -> Self {
        match result {
            Ok(data) => Self {
                request_id,
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                request_id,
                ok: false,
                data: None,
                error: Some(ReplyError {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            },
        }
    }

    /// Reply for a message that could not be decoded.
    pub fn malformed(request_id: Option<String>, err: &serde_json::Error) -> Self {
        Self::new(request_id, Err(GatewayError::validation(err.to_string())))
    }
}

impl Engine {
    /// Register a connecting session: record its display name, load its space
    /// and stamp the current rank.
    pub async fn connect(&self, session: Session) -> Result<Session> {
        require_id(session.operator_id.as_str(), "operatorId")?;
        {
            let now = self.now();
            let mut conn = self.pool.acquire().await?;
            persistence::ledger::set_display_name(
                &mut conn,
                &session.operator_id,
                &session.display_name,
                now,
            )
            .await?;
        }
        self.ensure_space(&session.space_id).await?;
        let rank = self.profile(&session.operator_id).await?.rank;
        info!(
            operator_id = %session.operator_id,
            space_id = %session.space_id,
            rank,
            "session connected"
        );
        Ok(session)
    }

    /// Drop the session's crew seat, if any.
    pub async fn disconnect(&self, session: &Session) -> Result<()> {
        self.leave(session).await?;
        info!(operator_id = %session.operator_id, "session disconnected");
        Ok(())
    }

    /// Run one request for `session`.
    pub async fn handle(&self, session: &Session, request: Request) -> Result<Response> {
        request.validate()?;
        debug!(operator_id = %session.operator_id, request = request.name(), "gateway request");
        let op = &session.operator_id;
        Ok(match request {
            Request::Join { vessel_id } => {
                Response::Vessel(self.join(session, vessel_id.as_ref()).await?)
            }
            Request::Leave => Response::Left(self.leave(session).await?),
            Request::Create => Response::Vessel(self.create_vessel(session).await?),
            Request::Store { vessel_id } => {
                Response::Vessel(self.store_vessel(session, &vessel_id).await?)
            }
            Request::Activate { vessel_id } => {
                Response::Vessel(self.activate_vessel(session, &vessel_id).await?)
            }
            Request::Station {
                vessel_id,
                station,
                claim,
            } => Response::Vessel(
                self.update_station(session, &vessel_id, station, claim)
                    .await?,
            ),
            Request::State { vessel_id, state } => {
                Response::Vessel(self.crew_state_update(session, &vessel_id, state).await?)
            }
            Request::Get { vessel_id } => {
                Response::Vessel(self.vessel(&vessel_id).await?.projection())
            }
            Request::List => Response::Vessels(self.list_vessels(&session.space_id).await?),
            Request::LeaseCreate(terms) => {
                Response::Lease(self.create_lease(session, terms).await?)
            }
            Request::LeaseAccept { lease_id } => {
                Response::Lease(self.accept_lease(session, &lease_id).await?)
            }
            Request::LeaseEnd { lease_id } => {
                Response::Lease(self.end_lease(session, &lease_id).await?)
            }
            Request::LeaseList => Response::Leases(self.open_leases().await?),
            Request::SaleCreate(terms) => Response::Sale(self.create_sale(session, terms).await?),
            Request::SaleBuy { sale_id } => Response::Sale(self.buy_sale(session, &sale_id).await?),
            Request::SaleCancel { sale_id } => {
                Response::Vessel(self.cancel_sale(session, &sale_id).await?)
            }
            Request::SaleList => Response::Sales(self.open_sales().await?),
            Request::CargoCreate(req) => Response::Cargo(self.create_cargo(session, req).await?),
            Request::CargoAssign {
                cargo_id,
                vessel_id,
            } => Response::Cargo(self.assign_cargo(session, &cargo_id, &vessel_id).await?),
            Request::CargoRelease { cargo_id } => {
                self.release_cargo(session, &cargo_id).await?;
                Response::Done
            }
            Request::CargoList { port_id } => {
                Response::CargoList(self.cargo_at_port(&port_id).await?)
            }
            Request::CargoHold { vessel_id } => Response::Hold(self.hold(&vessel_id).await?),
            Request::PassengersAccept {
                contract_id,
                vessel_id,
            } => Response::Passengers(
                self.accept_passengers(session, &contract_id, &vessel_id)
                    .await?,
            ),
            Request::PassengersList { port_id } => {
                Response::PassengerList(self.passengers_at_port(&port_id).await?)
            }
            Request::Profile => Response::Profile(self.profile(op).await?),
            Request::Transactions { limit } => {
                Response::Transactions(self.recent_transactions(op, limit).await?)
            }
            Request::Congestion => Response::Congestion(self.congestion().await?),
            Request::LoanRequest { amount, term_days } => {
                Response::Loan(self.request_loan(session, amount, term_days).await?)
            }
            Request::LoanRepay { loan_id, amount } => {
                Response::Loan(self.repay_loan(session, &loan_id, amount).await?)
            }
            Request::LoanList => Response::Loans(self.loans(op).await?),
            Request::InsuranceBuy(req) => Response::Policy(self.buy_insurance(session, req).await?),
            Request::InsuranceCancel { policy_id } => {
                self.cancel_insurance(session, &policy_id).await?;
                Response::Done
            }
            Request::InsuranceList { vessel_id } => {
                Response::Policies(self.policies(&vessel_id).await?)
            }
        })
    }
}
