use log::debug;
use serde::Serialize;

use crate::fabcar::Car;
use crate::protos::peer::Response;

use super::chaincode::{Chaincode, ChaincodeStub};

const RANGE_START: &str = "CAR0";
const RANGE_END: &str = "CAR999";

const SEED: [(&str, &str, &str, &str); 10] = [
    ("Toyota", "Prius", "blue", "Tomoko"),
    ("Ford", "Mustang", "red", "Brad"),
    ("Hyundai", "Tucson", "green", "Jin Soo"),
    ("Volkswagen", "Passat", "yellow", "Max"),
    ("Tesla", "S", "black", "Adriana"),
    ("Peugeot", "205", "purple", "Michel"),
    ("Chery", "S22L", "white", "Aarav"),
    ("Fiat", "Punto", "violet", "Pari"),
    ("Tata", "Nano", "indigo", "Valeria"),
    ("Holden", "Barina", "brown", "Shotaro"),
];

#[derive(Serialize)]
struct QueryResult<'a> {
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "Record")]
    record: serde_json::Value,
}

/// The car registry chaincode.
pub struct FabCar;

impl Chaincode for FabCar {
    fn invoke(&self, stub: &mut ChaincodeStub) -> Response {
        let (function, args) = stub.function_and_parameters();
        debug!("fabcar {}: {}({:?})", stub.tx_id(), function, args);

        let result = match function.as_str() {
            "queryCar" => query_car(stub, &args),
            "initLedger" => init_ledger(stub),
            "createCar" => create_car(stub, &args),
            "queryAllCars" => query_all_cars(stub),
            "changeCarOwner" => change_car_owner(stub, &args),
            _ => Err("Invalid Smart Contract function name.".to_string()),
        };

        match result {
            Ok(payload) => Response::success(payload),
            Err(message) => Response::error(message),
        }
    }
}

type CcResult = std::result::Result<Vec<u8>, String>;

fn expect_args(args: &[String], count: usize) -> std::result::Result<(), String> {
    if args.len() != count {
        return Err(format!(
            "Incorrect number of arguments. Expecting {}",
            count
        ));
    }
    Ok(())
}

fn put_car(stub: &mut ChaincodeStub, key: &str, car: &Car) -> std::result::Result<(), String> {
    let bytes = serde_json::to_vec(car).map_err(|err| err.to_string())?;
    stub.put_state(key, bytes)
}

fn query_car(stub: &mut ChaincodeStub, args: &[String]) -> CcResult {
    expect_args(args, 1)?;
    stub.get_state(&args[0])
        .ok_or_else(|| format!("Car {} does not exist", args[0]))
}

fn init_ledger(stub: &mut ChaincodeStub) -> CcResult {
    for (i, (make, model, colour, owner)) in SEED.iter().enumerate() {
        let car = Car::new(make, model, colour, owner);
        put_car(stub, &format!("CAR{}", i), &car)?;
    }
    Ok(vec![])
}

fn create_car(stub: &mut ChaincodeStub, args: &[String]) -> CcResult {
    expect_args(args, 5)?;
    let car = Car::new(&args[1], &args[2], &args[3], &args[4]);
    put_car(stub, &args[0], &car)?;
    Ok(vec![])
}

fn query_all_cars(stub: &mut ChaincodeStub) -> CcResult {
    let entries = stub.get_state_by_range(RANGE_START, RANGE_END);

    let mut records = Vec::with_capacity(entries.len());
    for (key, value) in &entries {
        let record = serde_json::from_slice(value).map_err(|err| err.to_string())?;
        records.push(QueryResult { key, record });
    }
    serde_json::to_vec(&records).map_err(|err| err.to_string())
}

fn change_car_owner(stub: &mut ChaincodeStub, args: &[String]) -> CcResult {
    expect_args(args, 2)?;
    let bytes = stub
        .get_state(&args[0])
        .ok_or_else(|| format!("Car {} does not exist", args[0]))?;
    let mut car: Car = serde_json::from_slice(&bytes).map_err(|err| err.to_string())?;
    car.owner = args[1].clone();
    put_car(stub, &args[0], &car)?;
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devnet::ledger::WorldState;
    use std::collections::BTreeMap;

    fn run(state: &WorldState, args: &[&str]) -> (Response, crate::protos::kvrwset::KvRwSet) {
        let mut stub = ChaincodeStub::new(
            state,
            "tx",
            args.iter().map(|arg| arg.as_bytes().to_vec()).collect(),
            BTreeMap::new(),
        );
        let response = FabCar.invoke(&mut stub);
        (response, stub.into_rwset())
    }

    fn seeded() -> WorldState {
        let mut state = WorldState::new();
        let (response, rwset) = run(&state, &["initLedger"]);
        assert!(response.is_success());
        state.commit("genesis", Some(&[rwset][..]));
        state
    }

    #[test]
    fn init_ledger_writes_ten_cars() {
        let state = WorldState::new();
        let (_, rwset) = run(&state, &["initLedger"]);
        assert_eq!(rwset.writes.len(), 10);
        assert!(rwset.reads.is_empty());
    }

    #[test]
    fn query_car_returns_record() {
        let state = seeded();
        let (response, _) = run(&state, &["queryCar", "CAR4"]);
        assert!(response.is_success());
        let car: Car = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(car, Car::new("Tesla", "S", "black", "Adriana"));
    }

    #[test]
    fn query_all_cars_lists_key_and_record() {
        let state = seeded();
        let (response, rwset) = run(&state, &["queryAllCars"]);
        assert!(response.is_success());
        assert_eq!(rwset.reads.len(), 10);

        let all: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
        let all = all.as_array().unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0]["Key"], "CAR0");
        assert_eq!(all[0]["Record"]["owner"], "Tomoko");
        assert_eq!(all[9]["Record"]["make"], "Holden");
    }

    #[test]
    fn change_owner_rewrites_record() {
        let state = seeded();
        let (response, rwset) = run(&state, &["changeCarOwner", "CAR1", "Barry"]);
        assert!(response.is_success());
        assert_eq!(rwset.writes.len(), 1);
        let car: Car = serde_json::from_slice(&rwset.writes[0].value).unwrap();
        assert_eq!(car.owner, "Barry");
        assert_eq!(car.make, "Ford");
    }

    #[test]
    fn bad_calls_are_errors() {
        let state = seeded();

        let (response, _) = run(&state, &["createCar", "CAR11", "Honda"]);
        assert_eq!(response.status, crate::protos::peer::ERROR);
        assert_eq!(
            response.message,
            "Incorrect number of arguments. Expecting 5"
        );

        let (response, _) = run(&state, &["fly"]);
        assert_eq!(response.message, "Invalid Smart Contract function name.");

        let (response, _) = run(&state, &["changeCarOwner", "CAR42", "Barry"]);
        assert!(!response.is_success());
    }
}
