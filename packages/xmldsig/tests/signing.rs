//! Enveloped signature behaviour on fiscal documents

use std::sync::OnceLock;

use fiscal_xmldsig::{
    canonicalize, verify_enveloped, DocumentSigner, SigningCredential, SigningError,
    XMLDSIG_NAMESPACE,
};
use proptest::prelude::*;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;

struct TestCredential {
    key: Option<RsaPrivateKey>,
    certificate: Vec<u8>,
}

impl SigningCredential for TestCredential {
    fn signing_key(&self) -> Option<&RsaPrivateKey> {
        self.key.as_ref()
    }

    fn leaf_certificate_der(&self) -> &[u8] {
        &self.certificate
    }
}

fn credential() -> &'static TestCredential {
    static CREDENTIAL: OnceLock<TestCredential> = OnceLock::new();
    CREDENTIAL.get_or_init(|| {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).expect("rsa key");
        let pem = key.to_pkcs8_pem(LineEnding::LF).expect("pkcs8 pem");
        let key_pair = rcgen::KeyPair::from_pem(&pem).expect("rcgen key pair");
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).expect("params");
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "EMPRESA TESTE LTDA:11222333000181");
        let certificate = params.self_signed(&key_pair).expect("certificate");
        TestCredential {
            key: Some(key),
            certificate: certificate.der().to_vec(),
        }
    })
}

const INUTILIZACAO: &str = concat!(
    r#"<inutNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">"#,
    r#"<infInut Id="ID35261122233300018155001000000001000000010">"#,
    "<tpAmb>2</tpAmb><xServ>INUTILIZAR</xServ><cUF>35</cUF><ano>26</ano>",
    "<CNPJ>11222333000181</CNPJ><mod>55</mod><serie>1</serie>",
    "<nNFIni>1</nNFIni><nNFFin>10</nNFFin>",
    "<xJust>Falha no sistema de emissao &amp; numeracao</xJust>",
    "</infInut></inutNFe>"
);

#[test]
fn signature_is_appended_as_last_child_of_root() {
    let signed = DocumentSigner::new()
        .sign(INUTILIZACAO, credential())
        .expect("signing should succeed");
    let xml = signed.as_str();

    let signature_start = xml.find("<Signature").expect("signature element");
    assert!(xml[signature_start..].starts_with(&format!("<Signature xmlns=\"{XMLDSIG_NAMESPACE}\">")));
    assert!(xml.ends_with("</Signature></inutNFe>"));
    assert!(xml.contains(r#"<Reference URI="">"#));
    assert!(xml.contains("<X509Certificate>"));

    // Nothing but the signature was added
    let signature_end = xml.rfind("</inutNFe>").unwrap();
    let without_signature = format!("{}{}", &xml[..signature_start], &xml[signature_end..]);
    assert_eq!(without_signature, INUTILIZACAO);
}

#[test]
fn signed_document_verifies_against_embedded_certificate() {
    let signed = DocumentSigner::new().sign(INUTILIZACAO, credential()).unwrap();
    let verified = verify_enveloped(signed.as_str()).expect("signature should verify");
    assert_eq!(verified.certificate_der, credential().certificate);
    assert!(verified.subject.contains("11222333000181"));
}

#[test]
fn double_signing_is_rejected() {
    let signer = DocumentSigner::new();
    let signed = signer.sign(INUTILIZACAO, credential()).unwrap();
    let result = signer.sign(signed.as_str(), credential());
    assert_eq!(result, Err(SigningError::AlreadySigned));
}

#[test]
fn tampering_breaks_the_digest() {
    let signed = DocumentSigner::new().sign(INUTILIZACAO, credential()).unwrap();
    let tampered = signed.as_str().replace("<nNFFin>10</nNFFin>", "<nNFFin>99</nNFFin>");
    match verify_enveloped(&tampered) {
        Err(SigningError::InvalidSignature(msg)) => assert!(msg.contains("digest")),
        other => panic!("expected digest mismatch, got {other:?}"),
    }
}

#[test]
fn forged_signature_value_is_detected() {
    let signed = DocumentSigner::new().sign(INUTILIZACAO, credential()).unwrap();
    let xml = signed.as_str();
    let start = xml.find("<SignatureValue>").unwrap() + "<SignatureValue>".len();
    let mut forged = xml.to_string();
    let replacement = if &xml[start..=start] == "A" { "B" } else { "A" };
    forged.replace_range(start..=start, replacement);
    assert!(matches!(
        verify_enveloped(&forged),
        Err(SigningError::InvalidSignature(_))
    ));
}

#[test]
fn xml_declaration_and_whitespace_are_preserved() {
    let xml = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{INUTILIZACAO}\n");
    let signed = DocumentSigner::new().sign(&xml, credential()).unwrap();
    assert!(signed.as_str().starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<inutNFe"));
    assert!(signed.as_str().ends_with("</Signature></inutNFe>\n"));
    verify_enveloped(signed.as_str()).unwrap();
}

#[test]
fn self_closing_root_gets_an_end_tag() {
    let xml = r#"<consStatServ xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"/>"#;
    let signed = DocumentSigner::new().sign(xml, credential()).unwrap();
    assert!(signed.as_str().starts_with(
        r#"<consStatServ xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><Signature"#
    ));
    assert!(signed.as_str().ends_with("</Signature></consStatServ>"));
    verify_enveloped(signed.as_str()).unwrap();
}

#[test]
fn prefixed_namespaces_on_root_are_part_of_signed_info_context() {
    let xml = r#"<p:evento xmlns:p="urn:evento" xmlns:x="urn:extra" p:versao="1.00"><p:id>1</p:id></p:evento>"#;
    let signed = DocumentSigner::new().sign(xml, credential()).unwrap();
    verify_enveloped(signed.as_str()).unwrap();
}

#[test]
fn malformed_input_is_rejected() {
    let result = DocumentSigner::new().sign("<inutNFe><infInut></inutNFe>", credential());
    assert!(matches!(result, Err(SigningError::Malformed(_))));
}

#[test]
fn credential_without_rsa_key_is_unusable() {
    let credential = TestCredential {
        key: None,
        certificate: credential().certificate.clone(),
    };
    let result = DocumentSigner::new().sign(INUTILIZACAO, &credential);
    assert!(matches!(result, Err(SigningError::UnusableKey(_))));
}

#[test]
fn unsigned_document_has_no_signature_to_verify() {
    assert_eq!(verify_enveloped(INUTILIZACAO), Err(SigningError::SignatureMissing));
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

proptest! {
    #[test]
    fn canonical_form_is_a_fixed_point(
        attr in "[ -~\t\n]{0,32}",
        text in "[ -~\t\n]{0,64}",
    ) {
        let xml = format!("<r b=\"{}\" a=\"1\"><c>{}</c><d/></r>", escape(&attr), escape(&text));
        let once = canonicalize(&xml).unwrap();
        let twice = canonicalize(&once).unwrap();
        prop_assert_eq!(once, twice);
    }
}

// W3C Canonical XML 1.0, section 3.3, without the DTD and the defaulted
// attribute it contributes to e9
const W3C_START_END_TAGS: &str = r##"<doc>
   <e1   />
   <e2   ></e2>
   <e3   name = "elem3"   id="elem3"   />
   <e4   name="elem4"   id="elem4"   ></e4>
   <e5 a:attr="out" b:attr="sorted" attr2="all" attr="I'm"
      xmlns:b="http://www.ietf.org"
      xmlns:a="http://www.w3.org"
      xmlns="http://example.org"/>
   <e6 xmlns="" xmlns:a="http://www.w3.org">
      <e7 xmlns="http://www.ietf.org">
         <e8 xmlns="" xmlns:a="http://www.w3.org">
            <e9 xmlns="" xmlns:a="http://www.ietf.org"/>
         </e8>
      </e7>
   </e6>
</doc>
"##;

const W3C_START_END_TAGS_C14N: &str = r##"<doc>
   <e1></e1>
   <e2></e2>
   <e3 id="elem3" name="elem3"></e3>
   <e4 id="elem4" name="elem4"></e4>
   <e5 xmlns="http://example.org" xmlns:a="http://www.w3.org" xmlns:b="http://www.ietf.org" attr="I'm" attr2="all" b:attr="sorted" a:attr="out"></e5>
   <e6 xmlns:a="http://www.w3.org">
      <e7 xmlns="http://www.ietf.org">
         <e8 xmlns="">
            <e9 xmlns:a="http://www.ietf.org"></e9>
         </e8>
      </e7>
   </e6>
</doc>"##;

// Section 3.4 without the DTD, so only CDATA-typed attribute normalization applies
const W3C_CHARACTER_MODIFICATIONS: &str = r##"<doc>
   <text>First line&#x0d;&#10;Second line</text>
   <value>&#x32;</value>
   <compute><![CDATA[value>"0" && value<"10" ?"valid":"error"]]></compute>
   <compute expr='value>"0" &amp;&amp; value&lt;"10" ?"valid":"error"'>valid</compute>
   <norm attr=' &apos;   &#x20;&#13;&#xa;&#9;   &apos; '/>
</doc>"##;

const W3C_CHARACTER_MODIFICATIONS_C14N: &str = r##"<doc>
   <text>First line&#xD;
Second line</text>
   <value>2</value>
   <compute>value&gt;"0" &amp;&amp; value&lt;"10" ?"valid":"error"</compute>
   <compute expr="value>&quot;0&quot; &amp;&amp; value&lt;&quot;10&quot; ?&quot;valid&quot;:&quot;error&quot;">valid</compute>
   <norm attr=" '    &#xD;&#xA;&#x9;   ' "></norm>
</doc>"##;

#[test]
fn w3c_start_and_end_tags_canonicalize_exactly() {
    assert_eq!(canonicalize(W3C_START_END_TAGS).unwrap(), W3C_START_END_TAGS_C14N);
}

#[test]
fn w3c_character_modifications_canonicalize_exactly() {
    assert_eq!(
        canonicalize(W3C_CHARACTER_MODIFICATIONS).unwrap(),
        W3C_CHARACTER_MODIFICATIONS_C14N
    );
}
